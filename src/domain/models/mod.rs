pub mod blackboard;
pub mod checkpoint;
pub mod config;
pub mod execution;
pub mod spawn_queue;
pub mod swarm;
pub mod trigger;
pub mod worker;
pub mod workflow;

pub use blackboard::{BlackboardMessage, MessageType, ReadFilter};
pub use checkpoint::{Checkpoint, CheckpointStatus};
pub use config::ServerConfig;
pub use execution::{ExecutionStatus, ExecutionStep, StepStatus, WorkflowExecution};
pub use spawn_queue::{Priority, SpawnPayload, SpawnQueueItem, SpawnQueueStatus};
pub use swarm::Swarm;
pub use trigger::{Trigger, TriggerCondition, TriggerType};
pub use worker::{OutputBuffer, SpawnMode, Worker, WorkerHealth, WorkerState};
pub use workflow::{
    Guard, OnFailure, ParallelStrategy, StepConfig, StepDefinition, StepType, Workflow, WorkflowInput,
    WorkflowValidationError,
};

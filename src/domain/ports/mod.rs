pub mod blackboard_repository;
pub mod checkpoint_repository;
pub mod execution_repository;
pub mod spawn_queue_repository;
pub mod swarm_repository;
pub mod trigger_repository;
pub mod worker_repository;
pub mod workflow_repository;

pub use blackboard_repository::BlackboardRepository;
pub use checkpoint_repository::CheckpointRepository;
pub use execution_repository::{ExecutionFilter, ExecutionStepRepository, WorkflowExecutionRepository};
pub use spawn_queue_repository::{SpawnQueueFilter, SpawnQueueRepository};
pub use swarm_repository::SwarmRepository;
pub use trigger_repository::TriggerRepository;
pub use worker_repository::{WorkerFilter, WorkerRepository};
pub use workflow_repository::WorkflowRepository;

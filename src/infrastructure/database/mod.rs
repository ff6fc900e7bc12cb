//! Sqlite-backed adapters for every domain repository port.

pub mod blackboard_repo;
pub mod checkpoint_repo;
pub mod connection;
pub mod execution_repo;
pub mod spawn_queue_repo;
pub mod swarm_repo;
pub mod trigger_repo;
pub mod utils;
pub mod worker_repo;
pub mod workflow_repo;

pub use blackboard_repo::BlackboardRepositoryImpl;
pub use checkpoint_repo::CheckpointRepositoryImpl;
pub use connection::DatabaseConnection;
pub use execution_repo::{ExecutionStepRepositoryImpl, WorkflowExecutionRepositoryImpl};
pub use spawn_queue_repo::SpawnQueueRepositoryImpl;
pub use swarm_repo::SwarmRepositoryImpl;
pub use trigger_repo::TriggerRepositoryImpl;
pub use worker_repo::WorkerRepositoryImpl;
pub use workflow_repo::WorkflowRepositoryImpl;

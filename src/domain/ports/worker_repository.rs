//! Worker repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Worker, WorkerState};

/// Filter criteria for listing workers.
#[derive(Debug, Clone, Default)]
pub struct WorkerFilter {
    pub swarm_id: Option<Uuid>,
    pub state: Option<WorkerState>,
    pub team_name: Option<String>,
}

/// Repository interface for Worker persistence.
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn create(&self, worker: &Worker) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Worker>>;
    async fn get_by_handle(&self, handle: &str) -> DomainResult<Option<Worker>>;
    async fn update(&self, worker: &Worker) -> DomainResult<()>;
    async fn delete(&self, id: Uuid) -> DomainResult<()>;
    async fn list(&self, filter: WorkerFilter) -> DomainResult<Vec<Worker>>;
    async fn list_non_stopped(&self) -> DomainResult<Vec<Worker>>;
    async fn count_non_stopped_in_swarm(&self, swarm_id: Uuid) -> DomainResult<u64>;
    async fn append_output(&self, id: Uuid, line: &str) -> DomainResult<()>;
    async fn recent_output(&self, id: Uuid, n: usize) -> DomainResult<Vec<String>>;
}

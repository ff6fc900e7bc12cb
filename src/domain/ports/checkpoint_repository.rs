//! Checkpoint repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Checkpoint;

/// Repository interface for Checkpoint persistence.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn create(&self, checkpoint: &Checkpoint) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Checkpoint>>;
    async fn update(&self, checkpoint: &Checkpoint) -> DomainResult<()>;
    async fn list_for_worker(&self, worker_id: Uuid) -> DomainResult<Vec<Checkpoint>>;
    async fn list_pending_expired(&self, now: chrono::DateTime<chrono::Utc>) -> DomainResult<Vec<Checkpoint>>;
}

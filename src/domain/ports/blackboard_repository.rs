//! Blackboard repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BlackboardMessage, ReadFilter};

/// Repository interface for BlackboardMessage persistence.
#[async_trait]
pub trait BlackboardRepository: Send + Sync {
    async fn post(&self, message: &BlackboardMessage) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<BlackboardMessage>>;
    async fn read(&self, swarm_id: Uuid, filter: ReadFilter) -> DomainResult<Vec<BlackboardMessage>>;
    async fn mark_read(&self, id: Uuid, reader_handle: &str) -> DomainResult<()>;
    async fn archive(&self, id: Uuid) -> DomainResult<()>;
    async fn archive_older_than(&self, swarm_id: Uuid, cutoff: chrono::DateTime<chrono::Utc>) -> DomainResult<u64>;
}

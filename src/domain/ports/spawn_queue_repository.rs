//! Spawn queue repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Priority, SpawnQueueItem, SpawnQueueStatus};

#[derive(Debug, Clone, Default)]
pub struct SpawnQueueFilter {
    pub status: Option<SpawnQueueStatus>,
    pub priority: Option<Priority>,
    pub requester_handle: Option<String>,
}

/// Repository interface for SpawnQueueItem persistence.
#[async_trait]
pub trait SpawnQueueRepository: Send + Sync {
    async fn create(&self, item: &SpawnQueueItem) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<SpawnQueueItem>>;
    async fn update(&self, item: &SpawnQueueItem) -> DomainResult<()>;
    async fn list(&self, filter: SpawnQueueFilter) -> DomainResult<Vec<SpawnQueueItem>>;

    /// Items with `status = pending` and `blocked_by_count = 0`, ordered by
    /// priority rank descending then `created_at` ascending (FIFO within a
    /// priority band).
    async fn get_ready(&self, limit: usize) -> DomainResult<Vec<SpawnQueueItem>>;

    /// Items that list `dependency_id` in `depends_on` and are not terminal.
    async fn get_dependents(&self, dependency_id: Uuid) -> DomainResult<Vec<SpawnQueueItem>>;

    /// Atomically decrements `blocked_by_count` on `item_id`, returning the
    /// item's new count.
    async fn decrement_blocked_count(&self, item_id: Uuid) -> DomainResult<u32>;

    async fn delete(&self, id: Uuid) -> DomainResult<()>;
}

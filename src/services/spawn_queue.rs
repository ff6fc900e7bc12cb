//! Spawn Queue service: priority + dependency admission ahead of the
//! Worker Supervisor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Priority, SpawnPayload, SpawnQueueItem, SpawnQueueStatus};
use crate::domain::ports::spawn_queue_repository::{SpawnQueueFilter, SpawnQueueRepository};
use crate::services::event_bus::{EventBus, EventTag};

#[derive(Debug, Clone, Default)]
pub struct SpawnQueueStats {
    pub by_status: HashMap<&'static str, u64>,
    pub by_priority: HashMap<&'static str, u64>,
    pub ready: u64,
    pub blocked: u64,
}

pub struct SpawnQueueService {
    repo: Arc<dyn SpawnQueueRepository>,
    event_bus: Arc<EventBus>,
}

impl SpawnQueueService {
    pub fn new(repo: Arc<dyn SpawnQueueRepository>, event_bus: Arc<EventBus>) -> Self {
        Self { repo, event_bus }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        requester_handle: impl Into<String>,
        target_agent_type: impl Into<String>,
        depth_level: u32,
        payload: SpawnPayload,
        priority: Priority,
        depends_on: HashSet<Uuid>,
    ) -> DomainResult<SpawnQueueItem> {
        let mut unresolved = 0u32;
        for dep_id in &depends_on {
            let dep = self.repo.get(*dep_id).await?.ok_or_else(|| DomainError::not_found("spawn queue item", dep_id))?;
            if dep.status != SpawnQueueStatus::Spawned {
                unresolved += 1;
            }
        }
        let item = SpawnQueueItem::new(requester_handle, target_agent_type, depth_level, payload, priority, depends_on, unresolved);
        self.repo.create(&item).await?;
        self.event_bus.publish(EventTag::SpawnEnqueued, serde_json::json!({ "item_id": item.id }));
        Ok(item)
    }

    pub async fn get_ready(&self, limit: usize) -> DomainResult<Vec<SpawnQueueItem>> {
        self.repo.get_ready(limit).await
    }

    pub async fn approve(&self, id: Uuid) -> DomainResult<SpawnQueueItem> {
        let mut item = self.repo.get(id).await?.ok_or_else(|| DomainError::not_found("spawn queue item", id))?;
        if item.status != SpawnQueueStatus::Pending {
            return Err(DomainError::WrongState(format!("item {id} is {}", item.status.as_str())));
        }
        item.status = SpawnQueueStatus::Approved;
        item.processed_at = Some(Utc::now());
        self.repo.update(&item).await?;
        self.event_bus.publish(EventTag::SpawnApproved, serde_json::json!({ "item_id": id }));
        Ok(item)
    }

    pub async fn reject(&self, id: Uuid) -> DomainResult<SpawnQueueItem> {
        let mut item = self.repo.get(id).await?.ok_or_else(|| DomainError::not_found("spawn queue item", id))?;
        if item.status != SpawnQueueStatus::Pending {
            return Err(DomainError::WrongState(format!("item {id} is {}", item.status.as_str())));
        }
        item.status = SpawnQueueStatus::Rejected;
        item.processed_at = Some(Utc::now());
        self.repo.update(&item).await?;
        self.event_bus.publish(EventTag::SpawnRejected, serde_json::json!({ "item_id": id }));
        self.release_dependents(id).await?;
        Ok(item)
    }

    pub async fn mark_spawned(&self, id: Uuid, worker_id: Uuid) -> DomainResult<SpawnQueueItem> {
        let mut item = self.repo.get(id).await?.ok_or_else(|| DomainError::not_found("spawn queue item", id))?;
        if !matches!(item.status, SpawnQueueStatus::Pending | SpawnQueueStatus::Approved) {
            return Err(DomainError::WrongState(format!("item {id} is {}", item.status.as_str())));
        }
        item.status = SpawnQueueStatus::Spawned;
        item.processed_at = Some(Utc::now());
        item.spawned_worker_id = Some(worker_id);
        self.repo.update(&item).await?;
        let released = self.release_dependents(id).await?;
        self.event_bus.publish(
            EventTag::SpawnFulfilled,
            serde_json::json!({ "item_id": id, "worker_id": worker_id, "released_item_ids": released }),
        );
        Ok(item)
    }

    /// Decrements `blocked_by_count` on every dependent of `dependency_id`;
    /// returns the ids of dependents that became ready as a result.
    async fn release_dependents(&self, dependency_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let dependents = self.repo.get_dependents(dependency_id).await?;
        let mut released = Vec::new();
        for dependent in dependents {
            let remaining = self.repo.decrement_blocked_count(dependent.id).await?;
            if remaining == 0 {
                released.push(dependent.id);
            }
        }
        Ok(released)
    }

    pub async fn get_stats(&self) -> DomainResult<SpawnQueueStats> {
        let items = self.repo.list(SpawnQueueFilter::default()).await?;
        let mut stats = SpawnQueueStats::default();
        for item in &items {
            *stats.by_status.entry(item.status.as_str()).or_insert(0) += 1;
            *stats.by_priority.entry(item.priority.as_str()).or_insert(0) += 1;
            if item.is_ready() {
                stats.ready += 1;
            } else if item.status == SpawnQueueStatus::Pending {
                stats.blocked += 1;
            }
        }
        Ok(stats)
    }

    /// Lists every item filed by `requester_handle`, any status. Used by the
    /// Workflow Engine to poll a `spawn` step's item back to completion.
    pub async fn list_by_requester(&self, requester_handle: &str) -> DomainResult<Vec<SpawnQueueItem>> {
        let filter = SpawnQueueFilter { requester_handle: Some(requester_handle.to_string()), ..Default::default() };
        self.repo.list(filter).await
    }

    pub async fn cancel_by_requester(&self, requester_handle: &str) -> DomainResult<Vec<Uuid>> {
        let filter = SpawnQueueFilter { status: Some(SpawnQueueStatus::Pending), requester_handle: Some(requester_handle.to_string()), ..Default::default() };
        let items = self.repo.list(filter).await?;
        let mut cancelled = Vec::with_capacity(items.len());
        for item in items {
            self.reject(item.id).await?;
            cancelled.push(item.id);
        }
        Ok(cancelled)
    }

    /// Removes terminal items whose `processed_at` is older than `max_age`.
    /// Pending items (never processed) are never swept.
    pub async fn cleanup(&self, max_age: chrono::Duration) -> DomainResult<usize> {
        let cutoff: DateTime<Utc> = Utc::now() - max_age;
        let items = self.repo.list(SpawnQueueFilter::default()).await?;
        let stale: Vec<Uuid> = items
            .into_iter()
            .filter(|item| item.status.is_terminal() && item.processed_at.is_some_and(|at| at < cutoff))
            .map(|item| item.id)
            .collect();
        for id in &stale {
            self.repo.delete(*id).await?;
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;
    use crate::infrastructure::database::SpawnQueueRepositoryImpl;

    async fn setup() -> SpawnQueueService {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let repo: Arc<dyn SpawnQueueRepository> = Arc::new(SpawnQueueRepositoryImpl::new(db.pool().clone()));
        SpawnQueueService::new(repo, Arc::new(EventBus::default()))
    }

    fn payload() -> SpawnPayload {
        SpawnPayload { task: "do it".into(), context: serde_json::Value::Null, checkpoint: None }
    }

    #[tokio::test]
    async fn mark_spawned_releases_dependent() {
        let service = setup().await;
        let dep = service.enqueue("req", "coder", 0, payload(), Priority::Normal, HashSet::new()).await.unwrap();

        let mut deps = HashSet::new();
        deps.insert(dep.id);
        let blocked = service.enqueue("req", "coder", 0, payload(), Priority::Normal, deps).await.unwrap();
        assert_eq!(blocked.blocked_by_count, 1);

        let ready_before = service.get_ready(10).await.unwrap();
        assert_eq!(ready_before.len(), 1);
        assert_eq!(ready_before[0].id, dep.id);

        service.mark_spawned(dep.id, Uuid::new_v4()).await.unwrap();

        let ready_after = service.get_ready(10).await.unwrap();
        assert_eq!(ready_after.len(), 1);
        assert_eq!(ready_after[0].id, blocked.id);
    }

    #[tokio::test]
    async fn approve_then_reject_is_rejected_as_wrong_state() {
        let service = setup().await;
        let item = service.enqueue("req", "coder", 0, payload(), Priority::Normal, HashSet::new()).await.unwrap();
        service.approve(item.id).await.unwrap();
        let result = service.approve(item.id).await;
        assert!(matches!(result, Err(DomainError::WrongState(_))));
    }

    #[tokio::test]
    async fn cancel_by_requester_releases_dependents() {
        let service = setup().await;
        let dep = service.enqueue("req", "coder", 0, payload(), Priority::Normal, HashSet::new()).await.unwrap();
        let mut deps = HashSet::new();
        deps.insert(dep.id);
        let blocked = service.enqueue("req", "coder", 0, payload(), Priority::Normal, deps).await.unwrap();

        service.cancel_by_requester("req").await.unwrap();
        let refreshed = service.repo.get(blocked.id).await.unwrap().unwrap();
        assert_eq!(refreshed.blocked_by_count, 0);
    }
}

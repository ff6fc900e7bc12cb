//! Blackboard service: per-swarm message log, thin over the repository pair.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BlackboardMessage, MessageType, Priority, ReadFilter};
use crate::domain::ports::blackboard_repository::BlackboardRepository;
use crate::domain::ports::swarm_repository::SwarmRepository;
use crate::services::event_bus::{EventBus, EventTag};

pub struct BlackboardService {
    blackboard_repo: Arc<dyn BlackboardRepository>,
    swarm_repo: Arc<dyn SwarmRepository>,
    event_bus: Arc<EventBus>,
}

impl BlackboardService {
    pub fn new(blackboard_repo: Arc<dyn BlackboardRepository>, swarm_repo: Arc<dyn SwarmRepository>, event_bus: Arc<EventBus>) -> Self {
        Self { blackboard_repo, swarm_repo, event_bus }
    }

    pub async fn post_message(
        &self,
        swarm_id: Uuid,
        sender_handle: impl Into<String>,
        message_type: MessageType,
        target_handle: Option<String>,
        priority: Priority,
        payload: serde_json::Value,
    ) -> DomainResult<BlackboardMessage> {
        if self.swarm_repo.get(swarm_id).await?.is_none() {
            return Err(DomainError::not_found("swarm", swarm_id));
        }
        let message = BlackboardMessage::new(swarm_id, sender_handle, message_type, target_handle, priority, payload);
        self.blackboard_repo.post(&message).await?;
        self.event_bus.publish(
            EventTag::BlackboardPosted,
            serde_json::json!({ "message_id": message.id, "swarm_id": swarm_id, "sender_handle": message.sender_handle }),
        );
        Ok(message)
    }

    pub async fn read_messages(&self, swarm_id: Uuid, filter: ReadFilter) -> DomainResult<Vec<BlackboardMessage>> {
        self.blackboard_repo.read(swarm_id, filter).await
    }

    /// Idempotent: marking an already-read message read again is a no-op.
    pub async fn mark_read(&self, message_ids: &[Uuid], reader_handle: &str) -> DomainResult<()> {
        for id in message_ids {
            self.blackboard_repo.mark_read(*id, reader_handle).await?;
        }
        Ok(())
    }

    pub async fn archive(&self, message_ids: &[Uuid]) -> DomainResult<()> {
        for id in message_ids {
            self.blackboard_repo.archive(*id).await?;
            self.event_bus.publish(EventTag::BlackboardArchived, serde_json::json!({ "message_id": id }));
        }
        Ok(())
    }

    pub async fn archive_old_messages(&self, swarm_id: Uuid, max_age_ms: i64) -> DomainResult<u64> {
        let cutoff = chrono::Utc::now() - chrono::Duration::milliseconds(max_age_ms);
        let count = self.blackboard_repo.archive_older_than(swarm_id, cutoff).await?;
        if count > 0 {
            self.event_bus.publish(EventTag::BlackboardArchived, serde_json::json!({ "swarm_id": swarm_id, "count": count }));
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;
    use crate::infrastructure::database::{BlackboardRepositoryImpl, SwarmRepositoryImpl};
    use crate::domain::models::Swarm;

    async fn setup() -> (BlackboardService, Uuid) {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let pool = db.pool().clone();
        let swarm_repo: Arc<dyn SwarmRepository> = Arc::new(SwarmRepositoryImpl::new(pool.clone()));
        let swarm = Swarm::new("alpha", None, 10);
        swarm_repo.create(&swarm).await.unwrap();
        let blackboard_repo: Arc<dyn BlackboardRepository> = Arc::new(BlackboardRepositoryImpl::new(pool));
        let service = BlackboardService::new(blackboard_repo, swarm_repo, Arc::new(EventBus::default()));
        (service, swarm.id)
    }

    #[tokio::test]
    async fn post_to_unknown_swarm_fails() {
        let (service, _) = setup().await;
        let result = service
            .post_message(Uuid::new_v4(), "coder-1", MessageType::Status, None, Priority::Normal, serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[tokio::test]
    async fn post_and_read_roundtrips() {
        let (service, swarm_id) = setup().await;
        service.post_message(swarm_id, "coder-1", MessageType::Status, None, Priority::Normal, serde_json::json!({"ok": true})).await.unwrap();
        let messages = service.read_messages(swarm_id, ReadFilter::default()).await.unwrap();
        assert_eq!(messages.len(), 1);
    }
}

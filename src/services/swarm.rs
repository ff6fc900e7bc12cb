//! Swarm service: thin lifecycle wrapper over `SwarmRepository`.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Swarm;
use crate::domain::ports::swarm_repository::SwarmRepository;
use crate::services::event_bus::{EventBus, EventTag};

pub struct SwarmService {
    repo: Arc<dyn SwarmRepository>,
    event_bus: Arc<EventBus>,
}

impl SwarmService {
    pub fn new(repo: Arc<dyn SwarmRepository>, event_bus: Arc<EventBus>) -> Self {
        Self { repo, event_bus }
    }

    pub async fn create(&self, name: impl Into<String>, description: Option<String>, max_agents: u32) -> DomainResult<Swarm> {
        let name = name.into();
        if !Swarm::validate_name(&name) {
            return Err(DomainError::ValidationFailure(format!("invalid swarm name: {name}")));
        }
        if self.repo.get_by_name(&name).await?.is_some() {
            return Err(DomainError::Conflict(format!("swarm name in use: {name}")));
        }
        let swarm = Swarm::new(name, description, max_agents);
        self.repo.create(&swarm).await?;
        self.event_bus.publish(EventTag::SwarmCreated, serde_json::json!({ "swarm_id": swarm.id, "name": swarm.name }));
        Ok(swarm)
    }

    pub async fn kill(&self, id: Uuid) -> DomainResult<()> {
        let mut swarm = self.repo.get(id).await?.ok_or_else(|| DomainError::not_found("swarm", id))?;
        if swarm.killed_at.is_some() {
            return Ok(());
        }
        swarm.killed_at = Some(chrono::Utc::now());
        self.repo.update(&swarm).await?;
        self.event_bus.publish(EventTag::SwarmKilled, serde_json::json!({ "swarm_id": id }));
        Ok(())
    }

    pub async fn list_alive(&self) -> DomainResult<Vec<Swarm>> {
        self.repo.list_alive().await
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Option<Swarm>> {
        self.repo.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;
    use crate::infrastructure::database::SwarmRepositoryImpl;

    async fn setup() -> SwarmService {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let repo: Arc<dyn SwarmRepository> = Arc::new(SwarmRepositoryImpl::new(db.pool().clone()));
        SwarmService::new(repo, Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn duplicate_name_is_conflict() {
        let service = setup().await;
        service.create("alpha", None, 10).await.unwrap();
        let result = service.create("alpha", None, 10).await;
        assert!(matches!(result, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let service = setup().await;
        let swarm = service.create("alpha", None, 10).await.unwrap();
        service.kill(swarm.id).await.unwrap();
        service.kill(swarm.id).await.unwrap();
        let refreshed = service.get(swarm.id).await.unwrap().unwrap();
        assert!(refreshed.killed_at.is_some());
    }
}

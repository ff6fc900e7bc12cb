//! Swarm repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Swarm;

/// Repository interface for Swarm persistence.
#[async_trait]
pub trait SwarmRepository: Send + Sync {
    async fn create(&self, swarm: &Swarm) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Swarm>>;
    async fn get_by_name(&self, name: &str) -> DomainResult<Option<Swarm>>;
    async fn update(&self, swarm: &Swarm) -> DomainResult<()>;
    async fn list_alive(&self) -> DomainResult<Vec<Swarm>>;
    async fn list_all(&self) -> DomainResult<Vec<Swarm>>;
}

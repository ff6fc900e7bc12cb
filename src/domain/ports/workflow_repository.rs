//! Workflow definition repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Workflow;

/// Repository interface for Workflow definition persistence.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create(&self, workflow: &Workflow) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Workflow>>;
    async fn get_by_name(&self, name: &str) -> DomainResult<Option<Workflow>>;
    async fn list(&self) -> DomainResult<Vec<Workflow>>;
    async fn delete(&self, id: Uuid) -> DomainResult<()>;
}

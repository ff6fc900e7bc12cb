//! Trigger repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Trigger, TriggerType};

/// Repository interface for Trigger persistence.
#[async_trait]
pub trait TriggerRepository: Send + Sync {
    async fn create(&self, trigger: &Trigger) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Trigger>>;
    async fn update(&self, trigger: &Trigger) -> DomainResult<()>;
    async fn delete(&self, id: Uuid) -> DomainResult<()>;
    async fn list(&self) -> DomainResult<Vec<Trigger>>;

    /// Enabled triggers of the given `trigger_type`.
    async fn list_enabled_by_type(&self, trigger_type: TriggerType) -> DomainResult<Vec<Trigger>>;
}

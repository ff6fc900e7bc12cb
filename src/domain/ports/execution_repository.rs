//! Workflow execution and execution step repository ports.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExecutionStatus, ExecutionStep, StepStatus, WorkflowExecution};

#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub swarm_id: Option<Uuid>,
}

/// Repository interface for WorkflowExecution persistence.
#[async_trait]
pub trait WorkflowExecutionRepository: Send + Sync {
    async fn create(&self, execution: &WorkflowExecution) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<WorkflowExecution>>;
    async fn update(&self, execution: &WorkflowExecution) -> DomainResult<()>;
    async fn list(&self, filter: ExecutionFilter) -> DomainResult<Vec<WorkflowExecution>>;
    async fn list_active(&self) -> DomainResult<Vec<WorkflowExecution>>;
}

/// Repository interface for ExecutionStep persistence.
#[async_trait]
pub trait ExecutionStepRepository: Send + Sync {
    async fn create(&self, step: &ExecutionStep) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<ExecutionStep>>;
    async fn get_by_key(&self, execution_id: Uuid, step_key: &str) -> DomainResult<Option<ExecutionStep>>;
    async fn update(&self, step: &ExecutionStep) -> DomainResult<()>;
    async fn list_for_execution(&self, execution_id: Uuid) -> DomainResult<Vec<ExecutionStep>>;

    /// Steps with `status = ready` for the given execution.
    async fn get_ready(&self, execution_id: Uuid) -> DomainResult<Vec<ExecutionStep>>;

    /// All non-terminal steps for the given execution (used for deadlock detection, P3).
    async fn list_non_terminal(&self, execution_id: Uuid) -> DomainResult<Vec<ExecutionStep>>;

    async fn count_by_status(&self, execution_id: Uuid) -> DomainResult<std::collections::HashMap<StepStatus, u64>>;
}

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionStep, StepStatus, WorkflowExecution};
use crate::domain::ports::execution_repository::{ExecutionFilter, ExecutionStepRepository, WorkflowExecutionRepository};
use crate::infrastructure::database::utils::parse_datetime;

pub struct WorkflowExecutionRepositoryImpl {
    pool: SqlitePool,
}

impl WorkflowExecutionRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> DomainResult<WorkflowExecution> {
        Ok(WorkflowExecution {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            workflow_id: Uuid::parse_str(&row.get::<String, _>("workflow_id"))?,
            created_by: row.get("created_by"),
            status: row.get::<String, _>("status").parse().map_err(DomainError::ValidationFailure)?,
            context: serde_json::from_str(&row.get::<String, _>("context"))?,
            swarm_id: row.get::<Option<String>, _>("swarm_id").as_deref().map(Uuid::parse_str).transpose()?,
            started_at: parse_datetime(&row.get::<String, _>("started_at")).map_err(DomainError::internal)?,
            completed_at: row.get::<Option<String>, _>("completed_at").as_deref().map(parse_datetime).transpose().map_err(DomainError::internal)?,
            error: row.get("error"),
            stalled_since: row.get::<Option<String>, _>("stalled_since").as_deref().map(parse_datetime).transpose().map_err(DomainError::internal)?,
        })
    }
}

#[async_trait]
impl WorkflowExecutionRepository for WorkflowExecutionRepositoryImpl {
    async fn create(&self, execution: &WorkflowExecution) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO workflow_executions (id, workflow_id, created_by, status, context, swarm_id, started_at, completed_at, error, stalled_since)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(&execution.created_by)
        .bind(execution.status.as_str())
        .bind(serde_json::to_string(&execution.context)?)
        .bind(execution.swarm_id.map(|id| id.to_string()))
        .bind(execution.started_at.to_rfc3339())
        .bind(execution.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(&execution.error)
        .bind(execution.stalled_since.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<WorkflowExecution>> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?").bind(id.to_string()).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn update(&self, execution: &WorkflowExecution) -> DomainResult<()> {
        sqlx::query("UPDATE workflow_executions SET status = ?, context = ?, completed_at = ?, error = ?, stalled_since = ? WHERE id = ?")
            .bind(execution.status.as_str())
            .bind(serde_json::to_string(&execution.context)?)
            .bind(execution.completed_at.map(|dt| dt.to_rfc3339()))
            .bind(&execution.error)
            .bind(execution.stalled_since.map(|dt| dt.to_rfc3339()))
            .bind(execution.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, filter: ExecutionFilter) -> DomainResult<Vec<WorkflowExecution>> {
        let mut query = String::from("SELECT * FROM workflow_executions WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();
        if let Some(workflow_id) = filter.workflow_id {
            query.push_str(" AND workflow_id = ?");
            binds.push(workflow_id.to_string());
        }
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        if let Some(swarm_id) = filter.swarm_id {
            query.push_str(" AND swarm_id = ?");
            binds.push(swarm_id.to_string());
        }
        query.push_str(" ORDER BY started_at ASC");

        let mut q = sqlx::query(&query);
        for bind in &binds {
            q = q.bind(bind);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn list_active(&self) -> DomainResult<Vec<WorkflowExecution>> {
        let rows = sqlx::query("SELECT * FROM workflow_executions WHERE status IN ('pending', 'running', 'paused')").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_execution).collect()
    }
}

pub struct ExecutionStepRepositoryImpl {
    pool: SqlitePool,
}

impl ExecutionStepRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> DomainResult<ExecutionStep> {
        Ok(ExecutionStep {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            execution_id: Uuid::parse_str(&row.get::<String, _>("execution_id"))?,
            step_key: row.get("step_key"),
            status: row.get::<String, _>("status").parse().map_err(DomainError::ValidationFailure)?,
            blocked_by_count: row.get::<i64, _>("blocked_by_count") as u32,
            retry_count: row.get::<i64, _>("retry_count") as u32,
            output: row.get::<Option<String>, _>("output").as_deref().map(serde_json::from_str).transpose()?,
            error: row.get("error"),
            started_at: row.get::<Option<String>, _>("started_at").as_deref().map(parse_datetime).transpose().map_err(DomainError::internal)?,
            ended_at: row.get::<Option<String>, _>("ended_at").as_deref().map(parse_datetime).transpose().map_err(DomainError::internal)?,
        })
    }
}

#[async_trait]
impl ExecutionStepRepository for ExecutionStepRepositoryImpl {
    async fn create(&self, step: &ExecutionStep) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO execution_steps (id, execution_id, step_key, status, blocked_by_count, retry_count, output, error, started_at, ended_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.execution_id.to_string())
        .bind(&step.step_key)
        .bind(step.status.as_str())
        .bind(step.blocked_by_count as i64)
        .bind(step.retry_count as i64)
        .bind(step.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&step.error)
        .bind(step.started_at.map(|dt| dt.to_rfc3339()))
        .bind(step.ended_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<ExecutionStep>> {
        let row = sqlx::query("SELECT * FROM execution_steps WHERE id = ?").bind(id.to_string()).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_step).transpose()
    }

    async fn get_by_key(&self, execution_id: Uuid, step_key: &str) -> DomainResult<Option<ExecutionStep>> {
        let row = sqlx::query("SELECT * FROM execution_steps WHERE execution_id = ? AND step_key = ?")
            .bind(execution_id.to_string())
            .bind(step_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_step).transpose()
    }

    async fn update(&self, step: &ExecutionStep) -> DomainResult<()> {
        sqlx::query(
            r#"UPDATE execution_steps SET status = ?, blocked_by_count = ?, retry_count = ?, output = ?, error = ?, started_at = ?, ended_at = ?
               WHERE id = ?"#,
        )
        .bind(step.status.as_str())
        .bind(step.blocked_by_count as i64)
        .bind(step.retry_count as i64)
        .bind(step.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&step.error)
        .bind(step.started_at.map(|dt| dt.to_rfc3339()))
        .bind(step.ended_at.map(|dt| dt.to_rfc3339()))
        .bind(step.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_execution(&self, execution_id: Uuid) -> DomainResult<Vec<ExecutionStep>> {
        let rows = sqlx::query("SELECT * FROM execution_steps WHERE execution_id = ?").bind(execution_id.to_string()).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_step).collect()
    }

    async fn get_ready(&self, execution_id: Uuid) -> DomainResult<Vec<ExecutionStep>> {
        let rows = sqlx::query("SELECT * FROM execution_steps WHERE execution_id = ? AND status = 'ready'").bind(execution_id.to_string()).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_step).collect()
    }

    async fn list_non_terminal(&self, execution_id: Uuid) -> DomainResult<Vec<ExecutionStep>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_steps WHERE execution_id = ? AND status NOT IN ('completed', 'failed', 'skipped', 'cancelled')",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_step).collect()
    }

    async fn count_by_status(&self, execution_id: Uuid) -> DomainResult<HashMap<StepStatus, u64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM execution_steps WHERE execution_id = ? GROUP BY status")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut counts = HashMap::new();
        for row in &rows {
            let status: StepStatus = row.get::<String, _>("status").parse().map_err(DomainError::ValidationFailure)?;
            counts.insert(status, row.get::<i64, _>("n") as u64);
        }
        Ok(counts)
    }
}

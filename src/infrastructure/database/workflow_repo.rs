use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Workflow;
use crate::domain::ports::workflow_repository::WorkflowRepository;

/// Workflow definitions are immutable-by-convention, so the whole
/// definition (steps, inputs, outputs) is stored as one JSON blob keyed by
/// `id`/`name` rather than normalized into per-step rows.
pub struct WorkflowRepositoryImpl {
    pool: SqlitePool,
}

impl WorkflowRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Workflow> {
        Ok(serde_json::from_str(&row.get::<String, _>("definition"))?)
    }
}

#[async_trait]
impl WorkflowRepository for WorkflowRepositoryImpl {
    async fn create(&self, workflow: &Workflow) -> DomainResult<()> {
        sqlx::query("INSERT INTO workflows (id, name, definition) VALUES (?, ?, ?)")
            .bind(workflow.id.to_string())
            .bind(&workflow.name)
            .bind(serde_json::to_string(workflow)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?").bind(id.to_string()).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_workflow).transpose()
    }

    async fn get_by_name(&self, name: &str) -> DomainResult<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE name = ?").bind(name).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_workflow).transpose()
    }

    async fn list(&self) -> DomainResult<Vec<Workflow>> {
        let rows = sqlx::query("SELECT * FROM workflows").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_workflow).collect()
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("DELETE FROM workflows WHERE id = ?").bind(id.to_string()).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{OnFailure, StepType, StepDefinition};
    use crate::infrastructure::database::connection::DatabaseConnection;

    async fn setup() -> SqlitePool {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.pool().clone()
    }

    fn sample_workflow() -> Workflow {
        Workflow::new(
            "deploy",
            vec![StepDefinition {
                key: "build".into(),
                name: "Build".into(),
                step_type: StepType::Task,
                depends_on: vec![],
                config: serde_json::Value::Null,
                guard: None,
                on_failure: OnFailure::Fail,
                max_retries: 0,
                timeout_ms: None,
            }],
        )
    }

    #[tokio::test]
    async fn create_and_get_by_name() {
        let pool = setup().await;
        let repo = WorkflowRepositoryImpl::new(pool);
        let wf = sample_workflow();
        repo.create(&wf).await.unwrap();

        let fetched = repo.get_by_name("deploy").await.unwrap().unwrap();
        assert_eq!(fetched.steps.len(), 1);
        assert_eq!(fetched.steps[0].key, "build");
    }
}

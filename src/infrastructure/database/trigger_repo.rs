use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Trigger, TriggerCondition, TriggerType};
use crate::domain::ports::trigger_repository::TriggerRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct TriggerRepositoryImpl {
    pool: SqlitePool,
}

impl TriggerRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_trigger(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Trigger> {
        let condition: Option<String> = row.get("condition");
        Ok(Trigger {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            name: row.get("name"),
            workflow_id: Uuid::parse_str(&row.get::<String, _>("workflow_id"))?,
            trigger_type: row.get::<String, _>("trigger_type").parse().map_err(DomainError::ValidationFailure)?,
            config: serde_json::from_str(&row.get::<String, _>("config"))?,
            condition: condition.map(|expression| TriggerCondition { expression }),
            enabled: row.get::<i64, _>("enabled") != 0,
            cooldown_ms: row.get::<Option<i64>, _>("cooldown_ms").map(|ms| ms as u64),
            created_at: parse_datetime(&row.get::<String, _>("created_at")).map_err(DomainError::internal)?,
            last_fired_at: row.get::<Option<String>, _>("last_fired_at").as_deref().map(parse_datetime).transpose().map_err(DomainError::internal)?,
            fire_count: row.get::<i64, _>("fire_count") as u64,
            pending_webhook: row.get::<i64, _>("pending_webhook") != 0,
        })
    }
}

#[async_trait]
impl TriggerRepository for TriggerRepositoryImpl {
    async fn create(&self, trigger: &Trigger) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO triggers (id, name, workflow_id, trigger_type, config, condition, enabled, cooldown_ms, created_at, last_fired_at, fire_count, pending_webhook)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(trigger.id.to_string())
        .bind(&trigger.name)
        .bind(trigger.workflow_id.to_string())
        .bind(trigger.trigger_type.as_str())
        .bind(serde_json::to_string(&trigger.config)?)
        .bind(trigger.condition.as_ref().map(|c| c.expression.clone()))
        .bind(trigger.enabled as i64)
        .bind(trigger.cooldown_ms.map(|ms| ms as i64))
        .bind(trigger.created_at.to_rfc3339())
        .bind(trigger.last_fired_at.map(|dt| dt.to_rfc3339()))
        .bind(trigger.fire_count as i64)
        .bind(trigger.pending_webhook as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Trigger>> {
        let row = sqlx::query("SELECT * FROM triggers WHERE id = ?").bind(id.to_string()).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_trigger).transpose()
    }

    async fn update(&self, trigger: &Trigger) -> DomainResult<()> {
        sqlx::query(
            r#"UPDATE triggers SET config = ?, condition = ?, enabled = ?, cooldown_ms = ?, last_fired_at = ?, fire_count = ?, pending_webhook = ?
               WHERE id = ?"#,
        )
        .bind(serde_json::to_string(&trigger.config)?)
        .bind(trigger.condition.as_ref().map(|c| c.expression.clone()))
        .bind(trigger.enabled as i64)
        .bind(trigger.cooldown_ms.map(|ms| ms as i64))
        .bind(trigger.last_fired_at.map(|dt| dt.to_rfc3339()))
        .bind(trigger.fire_count as i64)
        .bind(trigger.pending_webhook as i64)
        .bind(trigger.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("DELETE FROM triggers WHERE id = ?").bind(id.to_string()).execute(&self.pool).await?;
        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<Trigger>> {
        let rows = sqlx::query("SELECT * FROM triggers ORDER BY created_at ASC").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_trigger).collect()
    }

    async fn list_enabled_by_type(&self, trigger_type: TriggerType) -> DomainResult<Vec<Trigger>> {
        let rows = sqlx::query("SELECT * FROM triggers WHERE trigger_type = ? AND enabled = 1")
            .bind(trigger_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_trigger).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;
    use crate::domain::models::Workflow;
    use crate::domain::ports::workflow_repository::WorkflowRepository;
    use crate::infrastructure::database::WorkflowRepositoryImpl;
    use serde_json::json;

    async fn setup() -> (SqlitePool, Uuid) {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let pool = db.pool().clone();
        let workflow = Workflow::new("on-crash", vec![]);
        WorkflowRepositoryImpl::new(pool.clone()).create(&workflow).await.unwrap();
        (pool, workflow.id)
    }

    fn sample(workflow_id: Uuid) -> Trigger {
        Trigger::new("notify-on-crash", workflow_id, TriggerType::Event, json!({ "busEvent": "worker_state_changed" }), None, Some(60_000))
    }

    #[tokio::test]
    async fn create_list_and_disable() {
        let (pool, workflow_id) = setup().await;
        let repo = TriggerRepositoryImpl::new(pool);
        let mut trigger = sample(workflow_id);
        repo.create(&trigger).await.unwrap();

        let enabled = repo.list_enabled_by_type(TriggerType::Event).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].workflow_id, workflow_id);

        trigger.enabled = false;
        repo.update(&trigger).await.unwrap();
        let enabled = repo.list_enabled_by_type(TriggerType::Event).await.unwrap();
        assert!(enabled.is_empty());
    }

    #[tokio::test]
    async fn pending_webhook_round_trips() {
        let (pool, workflow_id) = setup().await;
        let repo = TriggerRepositoryImpl::new(pool);
        let mut trigger = Trigger::new("on-hook", workflow_id, TriggerType::Webhook, json!({}), None, None);
        repo.create(&trigger).await.unwrap();

        trigger.pending_webhook = true;
        repo.update(&trigger).await.unwrap();
        let refreshed = repo.get(trigger.id).await.unwrap().unwrap();
        assert!(refreshed.pending_webhook);
    }
}

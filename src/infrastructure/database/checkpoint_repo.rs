use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Checkpoint;
use crate::domain::ports::checkpoint_repository::CheckpointRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct CheckpointRepositoryImpl {
    pool: SqlitePool,
}

impl CheckpointRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Checkpoint> {
        Ok(Checkpoint {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            worker_id: Uuid::parse_str(&row.get::<String, _>("worker_id"))?,
            swarm_id: row.get::<Option<String>, _>("swarm_id").as_deref().map(Uuid::parse_str).transpose()?,
            label: row.get("label"),
            state: serde_json::from_str(&row.get::<String, _>("state"))?,
            status: row.get::<String, _>("status").parse().map_err(DomainError::ValidationFailure)?,
            created_at: parse_datetime(&row.get::<String, _>("created_at")).map_err(DomainError::internal)?,
            expires_at: row.get::<Option<String>, _>("expires_at").as_deref().map(parse_datetime).transpose().map_err(DomainError::internal)?,
            resolved_at: row.get::<Option<String>, _>("resolved_at").as_deref().map(parse_datetime).transpose().map_err(DomainError::internal)?,
        })
    }
}

#[async_trait]
impl CheckpointRepository for CheckpointRepositoryImpl {
    async fn create(&self, checkpoint: &Checkpoint) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO checkpoints (id, worker_id, swarm_id, label, state, status, created_at, expires_at, resolved_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.worker_id.to_string())
        .bind(checkpoint.swarm_id.map(|id| id.to_string()))
        .bind(&checkpoint.label)
        .bind(serde_json::to_string(&checkpoint.state)?)
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.created_at.to_rfc3339())
        .bind(checkpoint.expires_at.map(|dt| dt.to_rfc3339()))
        .bind(checkpoint.resolved_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Checkpoint>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = ?").bind(id.to_string()).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn update(&self, checkpoint: &Checkpoint) -> DomainResult<()> {
        sqlx::query("UPDATE checkpoints SET status = ?, resolved_at = ? WHERE id = ?")
            .bind(checkpoint.status.as_str())
            .bind(checkpoint.resolved_at.map(|dt| dt.to_rfc3339()))
            .bind(checkpoint.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_for_worker(&self, worker_id: Uuid) -> DomainResult<Vec<Checkpoint>> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE worker_id = ? ORDER BY created_at ASC")
            .bind(worker_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_checkpoint).collect()
    }

    async fn list_pending_expired(&self, now: DateTime<Utc>) -> DomainResult<Vec<Checkpoint>> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_checkpoint).collect()
    }
}

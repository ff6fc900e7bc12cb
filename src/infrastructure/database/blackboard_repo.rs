use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BlackboardMessage, ReadFilter};
use crate::domain::ports::blackboard_repository::BlackboardRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct BlackboardRepositoryImpl {
    pool: SqlitePool,
}

impl BlackboardRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn read_by(&self, message_id: Uuid) -> DomainResult<HashSet<String>> {
        let rows = sqlx::query("SELECT reader_handle FROM blackboard_reads WHERE message_id = ?")
            .bind(message_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("reader_handle")).collect())
    }

    async fn row_to_message(&self, row: &sqlx::sqlite::SqliteRow) -> DomainResult<BlackboardMessage> {
        let id = Uuid::parse_str(&row.get::<String, _>("id"))?;
        Ok(BlackboardMessage {
            id,
            swarm_id: Uuid::parse_str(&row.get::<String, _>("swarm_id"))?,
            sender_handle: row.get("sender_handle"),
            message_type: row.get::<String, _>("message_type").parse().map_err(DomainError::ValidationFailure)?,
            target_handle: row.get("target_handle"),
            priority: row.get::<String, _>("priority").parse().map_err(DomainError::ValidationFailure)?,
            payload: serde_json::from_str(&row.get::<String, _>("payload"))?,
            created_at: parse_datetime(&row.get::<String, _>("created_at")).map_err(DomainError::internal)?,
            archived_at: row.get::<Option<String>, _>("archived_at").as_deref().map(parse_datetime).transpose().map_err(DomainError::internal)?,
            read_by: self.read_by(id).await?,
        })
    }
}

#[async_trait]
impl BlackboardRepository for BlackboardRepositoryImpl {
    async fn post(&self, message: &BlackboardMessage) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO blackboard_messages (id, swarm_id, sender_handle, message_type, target_handle, priority, payload, created_at, archived_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(message.swarm_id.to_string())
        .bind(&message.sender_handle)
        .bind(message.message_type.as_str())
        .bind(&message.target_handle)
        .bind(message.priority.as_str())
        .bind(serde_json::to_string(&message.payload)?)
        .bind(message.created_at.to_rfc3339())
        .bind(message.archived_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<BlackboardMessage>> {
        let row = sqlx::query("SELECT * FROM blackboard_messages WHERE id = ?").bind(id.to_string()).fetch_optional(&self.pool).await?;
        match row {
            Some(r) => Ok(Some(self.row_to_message(&r).await?)),
            None => Ok(None),
        }
    }

    async fn read(&self, swarm_id: Uuid, filter: ReadFilter) -> DomainResult<Vec<BlackboardMessage>> {
        let mut query = String::from("SELECT * FROM blackboard_messages WHERE swarm_id = ?");
        let mut binds: Vec<String> = vec![swarm_id.to_string()];

        if !filter.include_archived {
            query.push_str(" AND archived_at IS NULL");
        }
        if let Some(message_type) = filter.message_type {
            query.push_str(" AND message_type = ?");
            binds.push(message_type.as_str().to_string());
        }
        if let Some(priority) = filter.priority {
            query.push_str(" AND priority = ?");
            binds.push(priority.as_str().to_string());
        }
        if let Some(reader) = &filter.reader_handle {
            query.push_str(" AND (target_handle IS NULL OR target_handle = ?)");
            binds.push(reader.clone());
            if filter.unread_only {
                query.push_str(" AND id NOT IN (SELECT message_id FROM blackboard_reads WHERE reader_handle = ?)");
                binds.push(reader.clone());
            }
        }
        query.push_str(" ORDER BY created_at ASC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query(&query);
        for bind in &binds {
            q = q.bind(bind);
        }
        let rows = q.fetch_all(&self.pool).await?;
        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(self.row_to_message(row).await?);
        }
        Ok(messages)
    }

    async fn mark_read(&self, id: Uuid, reader_handle: &str) -> DomainResult<()> {
        sqlx::query("INSERT OR IGNORE INTO blackboard_reads (message_id, reader_handle) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(reader_handle)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn archive(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("UPDATE blackboard_messages SET archived_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn archive_older_than(&self, swarm_id: Uuid, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query("UPDATE blackboard_messages SET archived_at = ? WHERE swarm_id = ? AND archived_at IS NULL AND created_at < ?")
            .bind(Utc::now().to_rfc3339())
            .bind(swarm_id.to_string())
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{SpawnPayload, SpawnQueueItem};
use crate::domain::ports::spawn_queue_repository::{SpawnQueueFilter, SpawnQueueRepository};
use crate::infrastructure::database::utils::parse_datetime;

pub struct SpawnQueueRepositoryImpl {
    pool: SqlitePool,
}

impl SpawnQueueRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn depends_on(&self, item_id: Uuid) -> DomainResult<HashSet<Uuid>> {
        let rows = sqlx::query("SELECT depends_on_id FROM spawn_queue_dependencies WHERE item_id = ?")
            .bind(item_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Uuid::parse_str(&r.get::<String, _>("depends_on_id")).map_err(DomainError::from)).collect()
    }

    async fn row_to_item(&self, row: &sqlx::sqlite::SqliteRow) -> DomainResult<SpawnQueueItem> {
        let id = Uuid::parse_str(&row.get::<String, _>("id"))?;
        let payload: SpawnPayload = serde_json::from_str(&row.get::<String, _>("payload"))?;
        Ok(SpawnQueueItem {
            id,
            requester_handle: row.get("requester_handle"),
            target_agent_type: row.get("target_agent_type"),
            depth_level: row.get::<i64, _>("depth_level") as u32,
            priority: row.get::<String, _>("priority").parse().map_err(DomainError::ValidationFailure)?,
            status: row.get::<String, _>("status").parse().map_err(DomainError::ValidationFailure)?,
            payload,
            depends_on: self.depends_on(id).await?,
            blocked_by_count: row.get::<i64, _>("blocked_by_count") as u32,
            created_at: parse_datetime(&row.get::<String, _>("created_at")).map_err(DomainError::internal)?,
            processed_at: row.get::<Option<String>, _>("processed_at").as_deref().map(parse_datetime).transpose().map_err(DomainError::internal)?,
            spawned_worker_id: row.get::<Option<String>, _>("spawned_worker_id").as_deref().map(Uuid::parse_str).transpose()?,
        })
    }
}

#[async_trait]
impl SpawnQueueRepository for SpawnQueueRepositoryImpl {
    async fn create(&self, item: &SpawnQueueItem) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO spawn_queue_items (id, requester_handle, target_agent_type, depth_level, priority, status, payload, blocked_by_count, created_at, processed_at, spawned_worker_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(item.id.to_string())
        .bind(&item.requester_handle)
        .bind(&item.target_agent_type)
        .bind(item.depth_level as i64)
        .bind(item.priority.as_str())
        .bind(item.status.as_str())
        .bind(serde_json::to_string(&item.payload)?)
        .bind(item.blocked_by_count as i64)
        .bind(item.created_at.to_rfc3339())
        .bind(item.processed_at.map(|dt| dt.to_rfc3339()))
        .bind(item.spawned_worker_id.map(|id| id.to_string()))
        .execute(&mut *tx)
        .await?;

        for dep in &item.depends_on {
            sqlx::query("INSERT INTO spawn_queue_dependencies (item_id, depends_on_id) VALUES (?, ?)")
                .bind(item.id.to_string())
                .bind(dep.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<SpawnQueueItem>> {
        let row = sqlx::query("SELECT * FROM spawn_queue_items WHERE id = ?").bind(id.to_string()).fetch_optional(&self.pool).await?;
        match row {
            Some(r) => Ok(Some(self.row_to_item(&r).await?)),
            None => Ok(None),
        }
    }

    async fn update(&self, item: &SpawnQueueItem) -> DomainResult<()> {
        sqlx::query(
            r#"UPDATE spawn_queue_items SET status = ?, blocked_by_count = ?, processed_at = ?, spawned_worker_id = ? WHERE id = ?"#,
        )
        .bind(item.status.as_str())
        .bind(item.blocked_by_count as i64)
        .bind(item.processed_at.map(|dt| dt.to_rfc3339()))
        .bind(item.spawned_worker_id.map(|id| id.to_string()))
        .bind(item.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, filter: SpawnQueueFilter) -> DomainResult<Vec<SpawnQueueItem>> {
        let mut query = String::from("SELECT * FROM spawn_queue_items WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        if let Some(priority) = filter.priority {
            query.push_str(" AND priority = ?");
            binds.push(priority.as_str().to_string());
        }
        if let Some(requester) = filter.requester_handle {
            query.push_str(" AND requester_handle = ?");
            binds.push(requester);
        }
        query.push_str(" ORDER BY created_at ASC");

        let mut q = sqlx::query(&query);
        for bind in &binds {
            q = q.bind(bind);
        }
        let rows = q.fetch_all(&self.pool).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(self.row_to_item(row).await?);
        }
        Ok(items)
    }

    async fn get_ready(&self, limit: usize) -> DomainResult<Vec<SpawnQueueItem>> {
        let rows = sqlx::query(
            r#"SELECT * FROM spawn_queue_items
               WHERE status = 'pending' AND blocked_by_count = 0
               ORDER BY CASE priority WHEN 'critical' THEN 3 WHEN 'high' THEN 2 WHEN 'normal' THEN 1 ELSE 0 END DESC, created_at ASC
               LIMIT ?"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(self.row_to_item(row).await?);
        }
        Ok(items)
    }

    async fn get_dependents(&self, dependency_id: Uuid) -> DomainResult<Vec<SpawnQueueItem>> {
        let rows = sqlx::query(
            r#"SELECT i.* FROM spawn_queue_items i
               JOIN spawn_queue_dependencies d ON d.item_id = i.id
               WHERE d.depends_on_id = ? AND i.status = 'pending'"#,
        )
        .bind(dependency_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(self.row_to_item(row).await?);
        }
        Ok(items)
    }

    async fn decrement_blocked_count(&self, item_id: Uuid) -> DomainResult<u32> {
        sqlx::query("UPDATE spawn_queue_items SET blocked_by_count = MAX(blocked_by_count - 1, 0) WHERE id = ?")
            .bind(item_id.to_string())
            .execute(&self.pool)
            .await?;
        let count: i64 = sqlx::query_scalar("SELECT blocked_by_count FROM spawn_queue_items WHERE id = ?")
            .bind(item_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32)
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("DELETE FROM spawn_queue_items WHERE id = ?").bind(id.to_string()).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Priority;
    use crate::infrastructure::database::connection::DatabaseConnection;

    async fn setup() -> SqlitePool {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.pool().clone()
    }

    fn payload() -> SpawnPayload {
        SpawnPayload { task: "do the thing".into(), context: serde_json::Value::Null, checkpoint: None }
    }

    #[tokio::test]
    async fn ready_excludes_blocked_items() {
        let pool = setup().await;
        let repo = SpawnQueueRepositoryImpl::new(pool);

        let dep = SpawnQueueItem::new("req", "coder", 0, payload(), Priority::Normal, HashSet::new(), 0);
        repo.create(&dep).await.unwrap();

        let mut deps = HashSet::new();
        deps.insert(dep.id);
        let blocked = SpawnQueueItem::new("req", "coder", 0, payload(), Priority::Normal, deps, 1);
        repo.create(&blocked).await.unwrap();

        let ready = repo.get_ready(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, dep.id);
    }

    #[tokio::test]
    async fn ready_orders_by_priority_then_fifo() {
        let pool = setup().await;
        let repo = SpawnQueueRepositoryImpl::new(pool);

        let low = SpawnQueueItem::new("req", "coder", 0, payload(), Priority::Low, HashSet::new(), 0);
        let critical = SpawnQueueItem::new("req", "coder", 0, payload(), Priority::Critical, HashSet::new(), 0);
        repo.create(&low).await.unwrap();
        repo.create(&critical).await.unwrap();

        let ready = repo.get_ready(10).await.unwrap();
        assert_eq!(ready[0].id, critical.id);
    }

    #[tokio::test]
    async fn decrement_floors_at_zero() {
        let pool = setup().await;
        let repo = SpawnQueueRepositoryImpl::new(pool);
        let item = SpawnQueueItem::new("req", "coder", 0, payload(), Priority::Normal, HashSet::new(), 0);
        repo.create(&item).await.unwrap();

        let count = repo.decrement_blocked_count(item.id).await.unwrap();
        assert_eq!(count, 0);
    }
}

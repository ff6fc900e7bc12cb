use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Swarm;
use crate::domain::ports::swarm_repository::SwarmRepository;
use crate::infrastructure::database::utils::parse_datetime;

pub struct SwarmRepositoryImpl {
    pool: SqlitePool,
}

impl SwarmRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_swarm(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Swarm> {
        Ok(Swarm {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            name: row.get("name"),
            description: row.get("description"),
            max_agents: row.get::<i64, _>("max_agents") as u32,
            created_at: parse_datetime(&row.get::<String, _>("created_at")).map_err(crate::domain::errors::DomainError::internal)?,
            killed_at: row
                .get::<Option<String>, _>("killed_at")
                .as_deref()
                .map(parse_datetime)
                .transpose()
                .map_err(crate::domain::errors::DomainError::internal)?,
        })
    }
}

#[async_trait]
impl SwarmRepository for SwarmRepositoryImpl {
    async fn create(&self, swarm: &Swarm) -> DomainResult<()> {
        sqlx::query("INSERT INTO swarms (id, name, description, max_agents, created_at, killed_at) VALUES (?, ?, ?, ?, ?, ?)")
            .bind(swarm.id.to_string())
            .bind(&swarm.name)
            .bind(&swarm.description)
            .bind(swarm.max_agents as i64)
            .bind(swarm.created_at.to_rfc3339())
            .bind(swarm.killed_at.map(|dt| dt.to_rfc3339()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Swarm>> {
        let row = sqlx::query("SELECT * FROM swarms WHERE id = ?").bind(id.to_string()).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_swarm).transpose()
    }

    async fn get_by_name(&self, name: &str) -> DomainResult<Option<Swarm>> {
        let row = sqlx::query("SELECT * FROM swarms WHERE name = ?").bind(name).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_swarm).transpose()
    }

    async fn update(&self, swarm: &Swarm) -> DomainResult<()> {
        sqlx::query("UPDATE swarms SET description = ?, max_agents = ?, killed_at = ? WHERE id = ?")
            .bind(&swarm.description)
            .bind(swarm.max_agents as i64)
            .bind(swarm.killed_at.map(|dt| dt.to_rfc3339()))
            .bind(swarm.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_alive(&self) -> DomainResult<Vec<Swarm>> {
        let rows = sqlx::query("SELECT * FROM swarms WHERE killed_at IS NULL ORDER BY created_at ASC").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_swarm).collect()
    }

    async fn list_all(&self) -> DomainResult<Vec<Swarm>> {
        let rows = sqlx::query("SELECT * FROM swarms ORDER BY created_at ASC").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_swarm).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;

    async fn setup() -> SqlitePool {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.pool().clone()
    }

    #[tokio::test]
    async fn create_get_and_kill() {
        let pool = setup().await;
        let repo = SwarmRepositoryImpl::new(pool);
        let mut swarm = Swarm::new("alpha", None, 10);
        repo.create(&swarm).await.unwrap();

        assert!(repo.get_by_name("alpha").await.unwrap().is_some());

        swarm.killed_at = Some(chrono::Utc::now());
        repo.update(&swarm).await.unwrap();

        let alive = repo.list_alive().await.unwrap();
        assert!(alive.is_empty());
    }
}

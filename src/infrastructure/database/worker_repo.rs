use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::worker::OutputBuffer;
use crate::domain::models::Worker;
use crate::domain::ports::worker_repository::{WorkerFilter, WorkerRepository};
use crate::infrastructure::database::utils::parse_datetime;

pub struct WorkerRepositoryImpl {
    pool: SqlitePool,
    output_buffer_lines: usize,
}

impl WorkerRepositoryImpl {
    pub fn new(pool: SqlitePool, output_buffer_lines: usize) -> Self {
        Self { pool, output_buffer_lines }
    }

    fn row_to_worker(&self, row: &sqlx::sqlite::SqliteRow) -> DomainResult<Worker> {
        Ok(Worker {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            handle: row.get("handle"),
            team_name: row.get("team_name"),
            swarm_id: row.get::<Option<String>, _>("swarm_id").as_deref().map(Uuid::parse_str).transpose()?,
            depth_level: row.get::<i64, _>("depth_level") as u32,
            state: row.get::<String, _>("state").parse().map_err(crate::domain::errors::DomainError::ValidationFailure)?,
            health: row.get::<String, _>("health").parse().map_err(crate::domain::errors::DomainError::ValidationFailure)?,
            spawn_mode: row.get::<String, _>("spawn_mode").parse().map_err(crate::domain::errors::DomainError::ValidationFailure)?,
            working_dir: row.get("working_dir"),
            session_id: Uuid::parse_str(&row.get::<String, _>("session_id"))?,
            current_task_id: row.get::<Option<String>, _>("current_task_id").as_deref().map(Uuid::parse_str).transpose()?,
            restart_count: row.get::<i64, _>("restart_count") as u32,
            spawned_at: parse_datetime(&row.get::<String, _>("spawned_at")).map_err(crate::domain::errors::DomainError::internal)?,
            recent_output: OutputBuffer::new(self.output_buffer_lines),
        })
    }
}

#[async_trait]
impl WorkerRepository for WorkerRepositoryImpl {
    async fn create(&self, worker: &Worker) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO workers (id, handle, team_name, swarm_id, depth_level, state, health, spawn_mode, working_dir, session_id, current_task_id, restart_count, spawned_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(worker.id.to_string())
        .bind(&worker.handle)
        .bind(&worker.team_name)
        .bind(worker.swarm_id.map(|id| id.to_string()))
        .bind(worker.depth_level as i64)
        .bind(worker.state.as_str())
        .bind(worker.health.as_str())
        .bind(worker.spawn_mode.as_str())
        .bind(&worker.working_dir)
        .bind(worker.session_id.to_string())
        .bind(worker.current_task_id.map(|id| id.to_string()))
        .bind(worker.restart_count as i64)
        .bind(worker.spawned_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE id = ?").bind(id.to_string()).fetch_optional(&self.pool).await?;
        row.as_ref().map(|r| self.row_to_worker(r)).transpose()
    }

    async fn get_by_handle(&self, handle: &str) -> DomainResult<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE handle = ? AND state != 'stopped' ORDER BY spawned_at DESC LIMIT 1")
            .bind(handle)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|r| self.row_to_worker(r)).transpose()
    }

    async fn update(&self, worker: &Worker) -> DomainResult<()> {
        sqlx::query(
            r#"UPDATE workers SET handle = ?, team_name = ?, swarm_id = ?, depth_level = ?, state = ?, health = ?, spawn_mode = ?, working_dir = ?, current_task_id = ?, restart_count = ?
               WHERE id = ?"#,
        )
        .bind(&worker.handle)
        .bind(&worker.team_name)
        .bind(worker.swarm_id.map(|id| id.to_string()))
        .bind(worker.depth_level as i64)
        .bind(worker.state.as_str())
        .bind(worker.health.as_str())
        .bind(worker.spawn_mode.as_str())
        .bind(&worker.working_dir)
        .bind(worker.current_task_id.map(|id| id.to_string()))
        .bind(worker.restart_count as i64)
        .bind(worker.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query("DELETE FROM workers WHERE id = ?").bind(id.to_string()).execute(&self.pool).await?;
        Ok(())
    }

    async fn list(&self, filter: WorkerFilter) -> DomainResult<Vec<Worker>> {
        let mut query = String::from("SELECT * FROM workers WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(swarm_id) = filter.swarm_id {
            query.push_str(" AND swarm_id = ?");
            binds.push(swarm_id.to_string());
        }
        if let Some(state) = filter.state {
            query.push_str(" AND state = ?");
            binds.push(state.as_str().to_string());
        }
        if let Some(team_name) = filter.team_name {
            query.push_str(" AND team_name = ?");
            binds.push(team_name);
        }
        query.push_str(" ORDER BY spawned_at ASC");

        let mut q = sqlx::query(&query);
        for bind in &binds {
            q = q.bind(bind);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(|r| self.row_to_worker(r)).collect()
    }

    async fn list_non_stopped(&self) -> DomainResult<Vec<Worker>> {
        let rows = sqlx::query("SELECT * FROM workers WHERE state != 'stopped' ORDER BY spawned_at ASC").fetch_all(&self.pool).await?;
        rows.iter().map(|r| self.row_to_worker(r)).collect()
    }

    async fn count_non_stopped_in_swarm(&self, swarm_id: Uuid) -> DomainResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workers WHERE swarm_id = ? AND state != 'stopped'")
            .bind(swarm_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn append_output(&self, id: Uuid, line: &str) -> DomainResult<()> {
        let next_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), -1) + 1 FROM worker_output_lines WHERE worker_id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        sqlx::query("INSERT INTO worker_output_lines (worker_id, seq, line) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(next_seq)
            .bind(line)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "DELETE FROM worker_output_lines WHERE worker_id = ? AND seq <= (SELECT MAX(seq) FROM worker_output_lines WHERE worker_id = ?) - ?",
        )
        .bind(id.to_string())
        .bind(id.to_string())
        .bind(self.output_buffer_lines as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_output(&self, id: Uuid, n: usize) -> DomainResult<Vec<String>> {
        let rows = sqlx::query("SELECT line FROM worker_output_lines WHERE worker_id = ? ORDER BY seq DESC LIMIT ?")
            .bind(id.to_string())
            .bind(n as i64)
            .fetch_all(&self.pool)
            .await?;
        let mut lines: Vec<String> = rows.iter().map(|r| r.get("line")).collect();
        lines.reverse();
        Ok(lines)
    }
}

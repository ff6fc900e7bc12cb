//! Worker Supervisor: owns the set of live `Worker` entities and the child
//! processes backing `process`-mode workers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::WorkerConfig;
use crate::domain::models::{SpawnMode, Worker, WorkerHealth, WorkerState};
use crate::domain::ports::swarm_repository::SwarmRepository;
use crate::domain::ports::worker_repository::WorkerRepository;
use crate::infrastructure::process::{ChildHandle, SpawnSpec};
use crate::services::event_bus::{EventBus, EventTag};

/// Request shape for `spawn_worker`.
pub struct SpawnWorkerRequest {
    pub handle: String,
    pub team_name: Option<String>,
    pub swarm_id: Option<Uuid>,
    pub working_dir: String,
    pub initial_prompt: Option<String>,
    pub program: String,
    pub args: Vec<String>,
    pub spawn_mode: SpawnMode,
    pub depth_level: u32,
}

/// A routing hint from an external classifier. `None` when the classifier
/// is unavailable; callers fall back to their own defaults (spec §4.2).
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoutingRecommendation {
    pub complexity: String,
    pub strategy: String,
    pub model: String,
    pub confidence: f64,
}

pub struct WorkerSupervisor {
    worker_repo: Arc<dyn WorkerRepository>,
    swarm_repo: Arc<dyn SwarmRepository>,
    event_bus: Arc<EventBus>,
    config: WorkerConfig,
    children: Arc<Mutex<HashMap<Uuid, ChildHandle>>>,
    restart_history: Mutex<HashMap<Uuid, VecDeque<DateTime<Utc>>>>,
}

impl WorkerSupervisor {
    pub fn new(worker_repo: Arc<dyn WorkerRepository>, swarm_repo: Arc<dyn SwarmRepository>, event_bus: Arc<EventBus>, config: WorkerConfig) -> Self {
        Self { worker_repo, swarm_repo, event_bus, config, children: Arc::new(Mutex::new(HashMap::new())), restart_history: Mutex::new(HashMap::new()) }
    }

    pub async fn spawn_worker(&self, req: SpawnWorkerRequest) -> DomainResult<Worker> {
        if !Worker::validate_handle(&req.handle) {
            return Err(DomainError::ValidationFailure(format!("invalid handle: {}", req.handle)));
        }
        if self.worker_repo.get_by_handle(&req.handle).await?.is_some() {
            return Err(DomainError::Conflict(format!("handle in use: {}", req.handle)));
        }
        if req.depth_level > self.config.max_depth {
            return Err(DomainError::LimitReached(format!("depth {} exceeds max {}", req.depth_level, self.config.max_depth)));
        }
        let live = self.worker_repo.list_non_stopped().await?.len() as u32;
        if live >= self.config.max_concurrent {
            return Err(DomainError::LimitReached(format!("concurrent worker cap reached ({})", self.config.max_concurrent)));
        }
        if let Some(swarm_id) = req.swarm_id {
            let swarm = self.swarm_repo.get(swarm_id).await?.ok_or_else(|| DomainError::not_found("swarm", swarm_id))?;
            let current = self.worker_repo.count_non_stopped_in_swarm(swarm_id).await?;
            if current >= swarm.max_agents as u64 {
                return Err(DomainError::LimitReached(format!("swarm {swarm_id} at capacity ({})", swarm.max_agents)));
            }
        }

        let mut worker = Worker::new(&req.handle, req.team_name, req.swarm_id, req.depth_level, req.spawn_mode, &req.working_dir, self.config.output_buffer_lines);
        self.worker_repo.create(&worker).await?;

        match req.spawn_mode {
            SpawnMode::Process => {
                let spec = SpawnSpec { program: req.program, args: req.args, working_dir: req.working_dir.clone() };
                let handle = ChildHandle::spawn(&spec, self.config.output_buffer_lines)
                    .map_err(|e| DomainError::ValidationFailure(format!("spawn failed: {e}")))?;
                self.children.lock().await.insert(worker.id, handle);
                self.spawn_output_forwarder(worker.id);

                if let Some(prompt) = &req.initial_prompt {
                    self.send_to_worker(worker.id, prompt).await?;
                }
            }
            SpawnMode::Tmux | SpawnMode::External => {
                // Not owned as a local child; the caller is responsible for
                // routing this worker's output via `inject_worker_output`.
                worker.state = WorkerState::Ready;
                self.worker_repo.update(&worker).await?;
            }
        }

        self.worker_repo.append_output(worker.id, &format!("[spawned handle={}]", worker.handle)).await?;
        self.event_bus.publish(EventTag::WorkerSpawned, serde_json::json!({ "worker_id": worker.id, "handle": worker.handle }));
        Ok(worker)
    }

    /// Forwards a child's stdout/stderr lines into the output buffer and
    /// flips the worker `starting -> ready` on the first line received.
    fn spawn_output_forwarder(&self, worker_id: Uuid) {
        // The forwarder only needs the pieces of `self` it touches; cloning
        // the Arcs keeps the spawned task 'static without borrowing `self`.
        let worker_repo = self.worker_repo.clone();
        let event_bus = self.event_bus.clone();
        let children = self.children.clone();
        tokio::spawn(async move {
            let mut first_line = true;
            loop {
                let line = {
                    let mut guard = children.lock().await;
                    match guard.get_mut(&worker_id) {
                        Some(child) => child.output_rx.recv().await,
                        None => None,
                    }
                };
                let Some(line) = line else { break };

                if worker_repo.append_output(worker_id, &line).await.is_err() {
                    break;
                }
                event_bus.publish(EventTag::WorkerOutput, serde_json::json!({ "worker_id": worker_id, "line": line }));

                if first_line {
                    first_line = false;
                    if let Ok(Some(mut worker)) = worker_repo.get(worker_id).await {
                        if worker.state == WorkerState::Starting {
                            worker.state = WorkerState::Ready;
                            worker.health = WorkerHealth::Healthy;
                            let _ = worker_repo.update(&worker).await;
                            event_bus.publish(EventTag::WorkerStateChanged, serde_json::json!({ "worker_id": worker_id, "state": "ready" }));
                        }
                    }
                }
            }
        });
    }

    pub async fn dismiss_worker_by_handle(&self, handle: &str) -> DomainResult<()> {
        let mut worker = self.worker_repo.get_by_handle(handle).await?.ok_or_else(|| DomainError::not_found("worker", handle))?;
        worker.state = WorkerState::Stopping;
        self.worker_repo.update(&worker).await?;

        if worker.spawn_mode == SpawnMode::Process {
            let mut children = self.children.lock().await;
            if let Some(mut child) = children.remove(&worker.id) {
                child
                    .terminate(Duration::from_millis(self.config.graceful_shutdown_ms), Duration::from_secs(self.config.hard_kill_deadline_secs))
                    .await
                    .map_err(|e| DomainError::internal(e))?;
            }
        }

        worker.state = WorkerState::Stopped;
        self.worker_repo.update(&worker).await?;
        self.event_bus.publish(EventTag::WorkerDismissed, serde_json::json!({ "worker_id": worker.id, "handle": handle }));
        Ok(())
    }

    /// Returns `false` for an unknown handle, `true` otherwise. I/O errors
    /// from the underlying child propagate as `Err`.
    pub async fn send_to_worker_by_handle(&self, handle: &str, message: &str) -> DomainResult<bool> {
        let Some(worker) = self.worker_repo.get_by_handle(handle).await? else {
            return Ok(false);
        };
        self.send_to_worker(worker.id, message).await?;
        Ok(true)
    }

    async fn send_to_worker(&self, worker_id: Uuid, message: &str) -> DomainResult<()> {
        let mut children = self.children.lock().await;
        if let Some(child) = children.get_mut(&worker_id) {
            child.send_line(message).await.map_err(|e| DomainError::internal(e))?;
        }
        Ok(())
    }

    pub async fn get_workers(&self) -> DomainResult<Vec<Worker>> {
        self.worker_repo.list_non_stopped().await
    }

    pub async fn get_worker_by_handle(&self, handle: &str) -> DomainResult<Option<Worker>> {
        self.worker_repo.get_by_handle(handle).await
    }

    pub async fn get_output_by_handle(&self, handle: &str, n: usize) -> DomainResult<Vec<String>> {
        let worker = self.worker_repo.get_by_handle(handle).await?.ok_or_else(|| DomainError::not_found("worker", handle))?;
        self.worker_repo.recent_output(worker.id, n).await
    }

    /// Registers a worker whose process this server does not own (e.g. a
    /// human-attended session). Output arrives only via `inject_worker_output`.
    pub async fn register_external_worker(&self, handle: impl Into<String>, swarm_id: Option<Uuid>, working_dir: impl Into<String>) -> DomainResult<Worker> {
        let handle = handle.into();
        if !Worker::validate_handle(&handle) {
            return Err(DomainError::ValidationFailure(format!("invalid handle: {handle}")));
        }
        if self.worker_repo.get_by_handle(&handle).await?.is_some() {
            return Err(DomainError::Conflict(format!("handle in use: {handle}")));
        }
        let mut worker = Worker::new(handle, None, swarm_id, 0, SpawnMode::External, working_dir, self.config.output_buffer_lines);
        worker.state = WorkerState::Ready;
        self.worker_repo.create(&worker).await?;
        self.event_bus.publish(EventTag::WorkerSpawned, serde_json::json!({ "worker_id": worker.id, "handle": worker.handle }));
        Ok(worker)
    }

    pub async fn inject_worker_output(&self, handle: &str, lines: &[String]) -> DomainResult<()> {
        let worker = self.worker_repo.get_by_handle(handle).await?.ok_or_else(|| DomainError::not_found("worker", handle))?;
        for line in lines {
            self.worker_repo.append_output(worker.id, line).await?;
            self.event_bus.publish(EventTag::WorkerOutput, serde_json::json!({ "worker_id": worker.id, "line": line }));
        }
        Ok(())
    }

    /// An external task-routing classifier is out of scope for the core
    /// (spec §4.2); this always reports unavailable so callers fall back
    /// to their own defaults.
    pub async fn get_routing_recommendation(&self, _task_draft: &str) -> Option<RoutingRecommendation> {
        None
    }

    /// Restarts a crashed worker, honouring the rolling-hour restart cap
    /// (`config.restart_cap_per_hour`). Exceeding the cap leaves the worker
    /// `stopped` and emits no respawn.
    pub async fn restart_worker(&self, worker_id: Uuid, spec: SpawnSpec) -> DomainResult<Worker> {
        let mut worker = self.worker_repo.get(worker_id).await?.ok_or_else(|| DomainError::not_found("worker", worker_id))?;

        let now = Utc::now();
        let mut history = self.restart_history.lock().await;
        let entry = history.entry(worker_id).or_default();
        while entry.front().is_some_and(|t| now.signed_duration_since(*t) > chrono::Duration::hours(1)) {
            entry.pop_front();
        }
        if entry.len() as u32 >= self.config.restart_cap_per_hour {
            worker.state = WorkerState::Stopped;
            self.worker_repo.update(&worker).await?;
            self.event_bus.publish(EventTag::WorkerStateChanged, serde_json::json!({ "worker_id": worker_id, "state": "stopped", "reason": "restart_cap_exceeded" }));
            return Err(DomainError::LimitReached(format!("restart cap exceeded for worker {worker_id}")));
        }
        entry.push_back(now);
        drop(history);

        let handle = ChildHandle::spawn(&spec, self.config.output_buffer_lines).map_err(|e| DomainError::ValidationFailure(format!("respawn failed: {e}")))?;
        self.children.lock().await.insert(worker_id, handle);
        self.spawn_output_forwarder(worker_id);

        worker.state = WorkerState::Starting;
        worker.restart_count += 1;
        self.worker_repo.update(&worker).await?;
        self.event_bus.publish(EventTag::WorkerRestarted, serde_json::json!({ "worker_id": worker_id, "restart_count": worker.restart_count }));
        Ok(worker)
    }

    /// Health sweep: `process`-mode children can exit without the output
    /// forwarder ever observing it (e.g. the child dies before writing a
    /// final line and closes both pipes at once). This walks the live
    /// child table for ones whose process has already exited and reconciles
    /// the worker record to `stopped`, since otherwise it would sit `working`
    /// forever. Returns the number of workers reaped.
    pub async fn reap_dead_children(&self) -> DomainResult<usize> {
        let dead: Vec<Uuid> = {
            let mut children = self.children.lock().await;
            let mut dead = Vec::new();
            for (id, child) in children.iter_mut() {
                if child.try_exit_code().is_some() {
                    dead.push(*id);
                }
            }
            for id in &dead {
                children.remove(id);
            }
            dead
        };

        for worker_id in &dead {
            if let Some(mut worker) = self.worker_repo.get(*worker_id).await? {
                if worker.state != WorkerState::Stopped {
                    worker.state = WorkerState::Stopped;
                    worker.health = WorkerHealth::Unhealthy;
                    self.worker_repo.update(&worker).await?;
                    self.event_bus.publish(
                        EventTag::WorkerStateChanged,
                        serde_json::json!({ "worker_id": worker_id, "state": "stopped", "reason": "process_exited" }),
                    );
                }
            }
        }
        Ok(dead.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::connection::DatabaseConnection;
    use crate::infrastructure::database::{SwarmRepositoryImpl, WorkerRepositoryImpl};

    async fn setup() -> WorkerSupervisor {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let pool = db.pool().clone();
        let worker_repo: Arc<dyn WorkerRepository> = Arc::new(WorkerRepositoryImpl::new(pool.clone(), 64));
        let swarm_repo: Arc<dyn SwarmRepository> = Arc::new(SwarmRepositoryImpl::new(pool));
        WorkerSupervisor::new(worker_repo, swarm_repo, Arc::new(EventBus::default()), WorkerConfig::default())
    }

    #[tokio::test]
    async fn duplicate_handle_is_rejected() {
        let sup = setup().await;
        sup.register_external_worker("coder-1", None, "/tmp").await.unwrap();
        let result = sup.register_external_worker("coder-1", None, "/tmp").await;
        assert!(matches!(result, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn external_worker_starts_ready() {
        let sup = setup().await;
        let worker = sup.register_external_worker("coder-1", None, "/tmp").await.unwrap();
        assert_eq!(worker.state, WorkerState::Ready);
    }

    #[tokio::test]
    async fn inject_output_then_dismiss() {
        let sup = setup().await;
        let worker = sup.register_external_worker("coder-1", None, "/tmp").await.unwrap();
        sup.inject_worker_output("coder-1", &["hello".to_string()]).await.unwrap();
        sup.dismiss_worker_by_handle("coder-1").await.unwrap();
        // get_by_handle only returns non-stopped workers; confirm it's
        // no longer reachable by handle but still present by id.
        assert!(sup.get_worker_by_handle("coder-1").await.unwrap().is_none());
        let stopped = sup.worker_repo.get(worker.id).await.unwrap().unwrap();
        assert_eq!(stopped.state, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn depth_beyond_max_is_limit_reached() {
        let sup = setup().await;
        let req = SpawnWorkerRequest {
            handle: "deep".into(),
            team_name: None,
            swarm_id: None,
            working_dir: "/tmp".into(),
            initial_prompt: None,
            program: "true".into(),
            args: vec![],
            spawn_mode: SpawnMode::Process,
            depth_level: 999,
        };
        let result = sup.spawn_worker(req).await;
        assert!(matches!(result, Err(DomainError::LimitReached(_))));
    }

    #[tokio::test]
    async fn concurrent_cap_rejects_once_reached() {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let pool = db.pool().clone();
        let worker_repo: Arc<dyn WorkerRepository> = Arc::new(WorkerRepositoryImpl::new(pool.clone(), 64));
        let swarm_repo: Arc<dyn SwarmRepository> = Arc::new(SwarmRepositoryImpl::new(pool));
        let mut config = WorkerConfig::default();
        config.max_concurrent = 1;
        let sup = WorkerSupervisor::new(worker_repo, swarm_repo, Arc::new(EventBus::default()), config);

        sup.register_external_worker("first", None, "/tmp").await.unwrap();
        let req = SpawnWorkerRequest {
            handle: "second".into(),
            team_name: None,
            swarm_id: None,
            working_dir: "/tmp".into(),
            initial_prompt: None,
            program: "true".into(),
            args: vec![],
            spawn_mode: SpawnMode::Process,
            depth_level: 0,
        };
        let result = sup.spawn_worker(req).await;
        assert!(matches!(result, Err(DomainError::LimitReached(_))));
    }

    #[tokio::test]
    async fn reap_marks_exited_process_worker_stopped() {
        let sup = setup().await;
        let req = SpawnWorkerRequest {
            handle: "short-lived".into(),
            team_name: None,
            swarm_id: None,
            working_dir: "/tmp".into(),
            initial_prompt: None,
            program: "true".into(),
            args: vec![],
            spawn_mode: SpawnMode::Process,
            depth_level: 0,
        };
        let worker = sup.spawn_worker(req).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let reaped = sup.reap_dead_children().await.unwrap();
        assert_eq!(reaped, 1);
        let stopped = sup.worker_repo.get(worker.id).await.unwrap().unwrap();
        assert_eq!(stopped.state, WorkerState::Stopped);
    }
}

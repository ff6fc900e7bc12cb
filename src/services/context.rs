//! `ServerContext`: the explicit composition root. Every repository and
//! service is constructed here and handed to the HTTP layer and the
//! background tick tasks as `Arc`s — no ambient globals or singletons
//! (spec §9, "module-level singletons" migration note).

use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::config::ServerConfig;
use crate::domain::ports::blackboard_repository::BlackboardRepository;
use crate::domain::ports::checkpoint_repository::CheckpointRepository;
use crate::domain::ports::execution_repository::{ExecutionStepRepository, WorkflowExecutionRepository};
use crate::domain::ports::spawn_queue_repository::SpawnQueueRepository;
use crate::domain::ports::swarm_repository::SwarmRepository;
use crate::domain::ports::trigger_repository::TriggerRepository;
use crate::domain::ports::worker_repository::WorkerRepository;
use crate::domain::ports::workflow_repository::WorkflowRepository;
use crate::infrastructure::database::connection::DatabaseConnection;
use crate::infrastructure::database::{
    BlackboardRepositoryImpl, CheckpointRepositoryImpl, ExecutionStepRepositoryImpl, SpawnQueueRepositoryImpl,
    SwarmRepositoryImpl, TriggerRepositoryImpl, WorkerRepositoryImpl, WorkflowExecutionRepositoryImpl,
    WorkflowRepositoryImpl,
};
use crate::services::blackboard::BlackboardService;
use crate::services::event_bus::EventBus;
use crate::services::spawn_queue::SpawnQueueService;
use crate::services::swarm::SwarmService;
use crate::services::trigger_dispatcher::TriggerDispatcher;
use crate::services::worker_supervisor::WorkerSupervisor;
use crate::services::workflow_engine::WorkflowEngine;

/// Everything the HTTP surface and the background ticks need. Cloning is
/// cheap: every field is an `Arc`.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub event_bus: Arc<EventBus>,
    pub swarms: Arc<SwarmService>,
    pub blackboard: Arc<BlackboardService>,
    pub spawn_queue: Arc<SpawnQueueService>,
    pub workers: Arc<WorkerSupervisor>,
    pub workflows: Arc<WorkflowEngine>,
    pub triggers: Arc<TriggerDispatcher>,
    pub workflow_repo: Arc<dyn WorkflowRepository>,
    pub execution_repo: Arc<dyn WorkflowExecutionRepository>,
    pub step_repo: Arc<dyn ExecutionStepRepository>,
    pub checkpoint_repo: Arc<dyn CheckpointRepository>,
}

impl ServerContext {
    pub async fn build(config: ServerConfig) -> anyhow::Result<Self> {
        let db = if config.database.path == "sqlite::memory:" {
            DatabaseConnection::connect_in_memory().await?
        } else {
            DatabaseConnection::connect(&config.database).await?
        };
        db.migrate().await?;
        let pool = db.pool().clone();

        let event_bus = Arc::new(EventBus::new(config.event_bus.channel_capacity));

        let worker_repo: Arc<dyn WorkerRepository> = Arc::new(WorkerRepositoryImpl::new(pool.clone(), config.worker.output_buffer_lines));
        let swarm_repo: Arc<dyn SwarmRepository> = Arc::new(SwarmRepositoryImpl::new(pool.clone()));
        let blackboard_repo: Arc<dyn BlackboardRepository> = Arc::new(BlackboardRepositoryImpl::new(pool.clone()));
        let spawn_repo: Arc<dyn SpawnQueueRepository> = Arc::new(SpawnQueueRepositoryImpl::new(pool.clone()));
        let workflow_repo: Arc<dyn WorkflowRepository> = Arc::new(WorkflowRepositoryImpl::new(pool.clone()));
        let execution_repo: Arc<dyn WorkflowExecutionRepository> = Arc::new(WorkflowExecutionRepositoryImpl::new(pool.clone()));
        let step_repo: Arc<dyn ExecutionStepRepository> = Arc::new(ExecutionStepRepositoryImpl::new(pool.clone()));
        let checkpoint_repo: Arc<dyn CheckpointRepository> = Arc::new(CheckpointRepositoryImpl::new(pool.clone()));
        let trigger_repo: Arc<dyn TriggerRepository> = Arc::new(TriggerRepositoryImpl::new(pool));

        let swarms = Arc::new(SwarmService::new(swarm_repo.clone(), event_bus.clone()));
        let blackboard = Arc::new(BlackboardService::new(blackboard_repo, swarm_repo.clone(), event_bus.clone()));
        let spawn_queue = Arc::new(SpawnQueueService::new(spawn_repo, event_bus.clone()));
        let workers = Arc::new(WorkerSupervisor::new(worker_repo, swarm_repo, event_bus.clone(), config.worker.clone()));
        let workflows = Arc::new(WorkflowEngine::new(
            workflow_repo.clone(),
            execution_repo.clone(),
            step_repo.clone(),
            checkpoint_repo.clone(),
            spawn_queue.clone(),
            event_bus.clone(),
            config.workflow.stuck_timeout_secs,
        ));
        let triggers = Arc::new(TriggerDispatcher::new(trigger_repo, event_bus.clone(), workflows.clone(), config.trigger.consecutive_failure_cap));

        Ok(Self {
            config: Arc::new(config),
            event_bus,
            swarms,
            blackboard,
            spawn_queue,
            workers,
            workflows,
            triggers,
            workflow_repo,
            execution_repo,
            step_repo,
            checkpoint_repo,
        })
    }

    /// Spawns the five long-lived background tasks named in spec §5's
    /// scheduling model (one each): workflow tick, trigger tick, spawn-queue
    /// tick, worker health tick, orphan-worktree cleanup. Each absorbs its
    /// own failures into a log line and keeps ticking (spec §7 propagation
    /// policy: "background ticks absorb any failure ... and continue").
    pub fn spawn_background_tasks(&self) {
        self.spawn_workflow_tick();
        self.spawn_trigger_tick();
        self.spawn_spawn_queue_tick();
        self.spawn_worker_health_tick();
        self.spawn_orphan_worktree_cleanup_tick();
    }

    fn spawn_workflow_tick(&self) {
        let workflows = self.workflows.clone();
        let interval_ms = self.config.workflow.tick_interval_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                if let Err(e) = workflows.process_executions().await {
                    tracing::warn!(error = %e, "workflow tick failed");
                }
            }
        });
    }

    /// Drives rule evaluation (`Schedule`-kind triggers) and, since the
    /// dispatcher has no way to poll the bus itself, also the only place
    /// `CoordinationEvent`s are turned into `handle_event` calls.
    fn spawn_trigger_tick(&self) {
        let triggers = self.triggers.clone();
        let poll_interval_secs = self.config.trigger.poll_interval_secs;
        let mut subscription = self.event_bus.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(poll_interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = triggers.process_triggers().await {
                            tracing::warn!(error = %e, "trigger tick failed");
                        }
                    }
                    delivery = subscription.recv() => {
                        match delivery {
                            Some(crate::services::event_bus::Delivery::Event(event)) => {
                                if let Err(e) = triggers.handle_event(&event).await {
                                    tracing::warn!(error = %e, "trigger event handling failed");
                                }
                            }
                            Some(crate::services::event_bus::Delivery::Lagged(n)) => {
                                tracing::warn!(dropped = n, "trigger dispatcher lagged behind the event bus");
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    /// Sweeps terminal spawn-queue items older than 24h, keeping the queue
    /// from growing unbounded over a long-lived process (mirrors the
    /// blackboard archival sweep named by spec §4.4).
    fn spawn_spawn_queue_tick(&self) {
        let spawn_queue = self.spawn_queue.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                match spawn_queue.cleanup(chrono::Duration::hours(24)).await {
                    Ok(n) if n > 0 => tracing::info!(count = n, "swept stale spawn queue items"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "spawn queue tick failed"),
                }
            }
        });
    }

    /// Reaps `process`-mode children that exited without the output
    /// forwarder ever observing it, reconciling the worker record to
    /// `stopped` (`WorkerSupervisor::reap_dead_children`).
    fn spawn_worker_health_tick(&self) {
        let workers = self.workers.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                match workers.reap_dead_children().await {
                    Ok(n) if n > 0 => tracing::info!(count = n, "reaped dead worker processes"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "worker health tick failed"),
                }
            }
        });
    }

    /// Git worktree lifecycle is a thin shell the core does not manage
    /// (spec's Non-goals). This tick only exists so the process has the
    /// fifth long-lived task spec §5 names; it has nothing to reap until a
    /// worktree-per-worker adapter is added, so it logs and returns.
    fn spawn_orphan_worktree_cleanup_tick(&self) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                tracing::debug!("orphan-worktree cleanup tick: no worktree adapter configured, nothing to do");
            }
        });
    }

    /// Hands out a fresh broadcast-style subscription for a new WS
    /// connection; kept as a thin pass-through so `http::ws` never touches
    /// `EventBus` directly.
    pub fn subscribe_events(&self) -> crate::services::event_bus::Subscription {
        self.event_bus.subscribe()
    }
}

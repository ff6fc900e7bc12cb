//! End-to-end scenario tests exercising the services through a real
//! in-memory sqlite database, in the style of the workflow engine's own
//! integration tests but crossing service boundaries (spawn queue,
//! worker supervisor, event bus) rather than one service in isolation.

use std::collections::HashSet;
use std::sync::Arc;

use fleetctl::domain::errors::DomainError;
use fleetctl::domain::models::config::WorkerConfig;
use fleetctl::domain::models::{
    ExecutionStatus, Guard, OnFailure, Priority, SpawnMode, SpawnPayload, StepConfig, StepDefinition, StepStatus, StepType, Workflow,
};
use fleetctl::domain::ports::checkpoint_repository::CheckpointRepository;
use fleetctl::domain::ports::execution_repository::{ExecutionStepRepository, WorkflowExecutionRepository};
use fleetctl::domain::ports::spawn_queue_repository::SpawnQueueRepository;
use fleetctl::domain::ports::swarm_repository::SwarmRepository;
use fleetctl::domain::ports::worker_repository::WorkerRepository;
use fleetctl::domain::ports::workflow_repository::WorkflowRepository;
use fleetctl::infrastructure::database::connection::DatabaseConnection;
use fleetctl::infrastructure::database::{
    CheckpointRepositoryImpl, ExecutionStepRepositoryImpl, SpawnQueueRepositoryImpl, SwarmRepositoryImpl, WorkerRepositoryImpl,
    WorkflowExecutionRepositoryImpl, WorkflowRepositoryImpl,
};
use fleetctl::services::{EventBus, SpawnQueueService, SpawnWorkerRequest, WorkerSupervisor, WorkflowEngine};
use serde_json::{json, Value};

fn step(key: &str, step_type: StepType, deps: &[&str], config: StepConfig) -> StepDefinition {
    StepDefinition {
        key: key.to_string(),
        name: key.to_string(),
        step_type,
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
        config,
        guard: None,
        on_failure: OnFailure::Fail,
        max_retries: 0,
        timeout_ms: None,
    }
}

struct Fixture {
    engine: Arc<WorkflowEngine>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    step_repo: Arc<dyn ExecutionStepRepository>,
    spawn_queue: Arc<SpawnQueueService>,
    workers: Arc<WorkerSupervisor>,
    swarm_repo: Arc<dyn SwarmRepository>,
    event_bus: Arc<EventBus>,
}

async fn setup() -> Fixture {
    setup_with_stuck_timeout(1_800).await
}

async fn setup_with_stuck_timeout(stuck_timeout_secs: u64) -> Fixture {
    let db = DatabaseConnection::connect_in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let pool = db.pool().clone();

    let workflow_repo: Arc<dyn WorkflowRepository> = Arc::new(WorkflowRepositoryImpl::new(pool.clone()));
    let execution_repo: Arc<dyn WorkflowExecutionRepository> = Arc::new(WorkflowExecutionRepositoryImpl::new(pool.clone()));
    let step_repo: Arc<dyn ExecutionStepRepository> = Arc::new(ExecutionStepRepositoryImpl::new(pool.clone()));
    let checkpoint_repo: Arc<dyn CheckpointRepository> = Arc::new(CheckpointRepositoryImpl::new(pool.clone()));
    let spawn_repo: Arc<dyn SpawnQueueRepository> = Arc::new(SpawnQueueRepositoryImpl::new(pool.clone()));
    let worker_repo: Arc<dyn WorkerRepository> = Arc::new(WorkerRepositoryImpl::new(pool.clone(), 100));
    let swarm_repo: Arc<dyn SwarmRepository> = Arc::new(SwarmRepositoryImpl::new(pool));

    let event_bus = Arc::new(EventBus::default());
    let spawn_queue = Arc::new(SpawnQueueService::new(spawn_repo, event_bus.clone()));
    let engine = Arc::new(WorkflowEngine::new(workflow_repo.clone(), execution_repo, step_repo.clone(), checkpoint_repo, spawn_queue.clone(), event_bus.clone(), stuck_timeout_secs));
    let workers = Arc::new(WorkerSupervisor::new(worker_repo, swarm_repo.clone(), event_bus.clone(), WorkerConfig::default()));

    Fixture { engine, workflow_repo, step_repo, spawn_queue, workers, swarm_repo, event_bus }
}

/// S1 — Kahn full cascade over a diamond DAG.
#[tokio::test]
async fn diamond_dag_cascades_to_completion() {
    let f = setup().await;
    let workflow = Workflow::new(
        "diamond",
        vec![
            step("a", StepType::Task, &[], Value::Null),
            step("b", StepType::Task, &["a"], Value::Null),
            step("c", StepType::Task, &["a"], Value::Null),
            step("d", StepType::Task, &["b", "c"], Value::Null),
        ],
    );
    f.workflow_repo.create(&workflow).await.unwrap();
    let execution = f.engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();

    let ready_keys = |steps: &[fleetctl::domain::models::ExecutionStep]| -> HashSet<String> {
        steps.iter().filter(|s| matches!(s.status, StepStatus::Ready | StepStatus::Running)).map(|s| s.step_key.clone()).collect()
    };

    let steps = f.step_repo.list_for_execution(execution.id).await.unwrap();
    assert_eq!(ready_keys(&steps), HashSet::from(["a".to_string()]));

    f.engine.complete_step(execution.id, "a", Some(json!({})), None).await.unwrap();
    let steps = f.step_repo.list_for_execution(execution.id).await.unwrap();
    assert_eq!(ready_keys(&steps), HashSet::from(["b".to_string(), "c".to_string()]));

    f.engine.complete_step(execution.id, "b", Some(json!({})), None).await.unwrap();
    let steps = f.step_repo.list_for_execution(execution.id).await.unwrap();
    assert_eq!(ready_keys(&steps), HashSet::from(["c".to_string()]));
    let d = steps.iter().find(|s| s.step_key == "d").unwrap();
    assert_eq!(d.blocked_by_count, 1);

    f.engine.complete_step(execution.id, "c", Some(json!({})), None).await.unwrap();
    let steps = f.step_repo.list_for_execution(execution.id).await.unwrap();
    assert_eq!(ready_keys(&steps), HashSet::from(["d".to_string()]));
    let d = steps.iter().find(|s| s.step_key == "d").unwrap();
    assert_eq!(d.blocked_by_count, 0);

    f.engine.complete_step(execution.id, "d", Some(json!({})), None).await.unwrap();
    let execution = f.engine.get_execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

/// S5 — a 3-cycle never becomes ready. It sits `stalled_since`-tracked
/// rather than failing outright, and is only declared a deadlock once
/// `stuck_timeout_secs` has elapsed (spec §4.5's design default is 1800s;
/// this fixture uses 0 so the second tick already clears the bar).
#[tokio::test]
async fn circular_dependency_fails_as_deadlock() {
    let f = setup_with_stuck_timeout(0).await;
    let workflow = Workflow::new(
        "cyclic",
        vec![
            step("a", StepType::Task, &["c"], Value::Null),
            step("b", StepType::Task, &["a"], Value::Null),
            step("c", StepType::Task, &["b"], Value::Null),
        ],
    );
    f.workflow_repo.create(&workflow).await.unwrap();
    let execution = f.engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();

    let steps = f.step_repo.list_for_execution(execution.id).await.unwrap();
    assert!(steps.iter().all(|s| matches!(s.status, StepStatus::Pending | StepStatus::Blocked)));

    let execution = f.engine.get_execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert!(execution.stalled_since.is_some());

    f.engine.process_executions().await.unwrap();
    let execution = f.engine.get_execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("deadlock"));
}

/// P10 — pause/cancel are idempotent no-ops once already applied.
#[tokio::test]
async fn pause_resume_are_idempotent() {
    let f = setup().await;
    let workflow = Workflow::new("pausable", vec![step("a", StepType::Task, &[], Value::Null)]);
    f.workflow_repo.create(&workflow).await.unwrap();
    let execution = f.engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();

    f.engine.pause_execution(execution.id).await.unwrap();
    f.engine.pause_execution(execution.id).await.unwrap();
    let execution = f.engine.get_execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Paused);

    f.engine.resume_execution(execution.id).await.unwrap();
    f.engine.resume_execution(execution.id).await.unwrap();
    let execution = f.engine.get_execution(execution.id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
}

/// S6 — priority ordering plus a blocked dependent released on fulfillment.
#[tokio::test]
async fn spawn_queue_priority_and_dependency_release() {
    let f = setup().await;
    let payload = || SpawnPayload { task: "do work".to_string(), context: Value::Null, checkpoint: None };

    let x = f.spawn_queue.enqueue("root", "worker", 0, payload(), Priority::Normal, HashSet::new()).await.unwrap();
    let z = f.spawn_queue.enqueue("root", "worker", 0, payload(), Priority::Critical, HashSet::new()).await.unwrap();
    let _y = f.spawn_queue.enqueue("root", "worker", 0, payload(), Priority::High, HashSet::from([x.id])).await.unwrap();

    let ready = f.spawn_queue.get_ready(10).await.unwrap();
    assert_eq!(ready.iter().map(|i| i.id).collect::<Vec<_>>(), vec![z.id, x.id]);

    f.spawn_queue.mark_spawned(x.id, uuid::Uuid::new_v4()).await.unwrap();
    let ready = f.spawn_queue.get_ready(10).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].target_agent_type, "worker");
}

/// S7-equivalent — every subscriber to the bus sees the same
/// `worker_spawned` event exactly once, independent of how many are
/// listening (the dashboard fanout policy is tested separately against
/// `ConnectionState` in `services::ws_fanout`).
#[tokio::test]
async fn worker_spawn_broadcasts_to_every_subscriber() {
    let f = setup().await;
    let swarm = f.swarm_repo.get(uuid::Uuid::new_v4()).await.unwrap();
    assert!(swarm.is_none());

    let mut sub_a = f.event_bus.subscribe();
    let mut sub_b = f.event_bus.subscribe();

    let worker = f
        .workers
        .spawn_worker(SpawnWorkerRequest {
            handle: "agent-1".to_string(),
            team_name: None,
            swarm_id: None,
            working_dir: "/tmp".to_string(),
            initial_prompt: None,
            program: "true".to_string(),
            args: vec![],
            spawn_mode: SpawnMode::External,
            depth_level: 0,
        })
        .await
        .unwrap();

    for sub in [&mut sub_a, &mut sub_b] {
        let delivery = sub.recv().await.unwrap();
        let fleetctl::services::Delivery::Event(event) = delivery else { panic!("expected an event, not a lag marker") };
        assert_eq!(event.tag, fleetctl::services::EventTag::WorkerSpawned);
        assert_eq!(event.payload["worker_id"], json!(worker.id));
    }
}

/// A handle already in use by a non-stopped worker is rejected (P8).
#[tokio::test]
async fn duplicate_handle_is_rejected() {
    let f = setup().await;
    let req = |handle: &str| SpawnWorkerRequest {
        handle: handle.to_string(),
        team_name: None,
        swarm_id: None,
        working_dir: "/tmp".to_string(),
        initial_prompt: None,
        program: "true".to_string(),
        args: vec![],
        spawn_mode: SpawnMode::External,
        depth_level: 0,
    };
    f.workers.spawn_worker(req("dup")).await.unwrap();
    let result = f.workers.spawn_worker(req("dup")).await;
    assert!(matches!(result, Err(DomainError::Conflict(_))));
}

/// A guard step that never matches its condition still lets its sibling
/// proceed (regression for S2/S3's shared branching machinery, exercised
/// here with an explicit `Guard` rather than a `gate` step).
#[tokio::test]
async fn guard_with_default_variables_is_evaluated_against_inputs() {
    let f = setup().await;
    let mut gated = step("b", StepType::Task, &["a"], Value::Null);
    gated.guard = Some(Guard { condition: "inputs.enabled === true".to_string(), variables: Value::Null });
    let workflow = Workflow::new("guarded-standalone", vec![step("a", StepType::Task, &[], Value::Null), gated]);
    f.workflow_repo.create(&workflow).await.unwrap();

    let execution = f.engine.start_workflow(workflow.id, "tester", json!({"enabled": true}), None).await.unwrap();
    f.engine.complete_step(execution.id, "a", Some(json!({})), None).await.unwrap();

    let steps = f.step_repo.list_for_execution(execution.id).await.unwrap();
    let b = steps.iter().find(|s| s.step_key == "b").unwrap();
    assert!(matches!(b.status, StepStatus::Ready | StepStatus::Running));
}

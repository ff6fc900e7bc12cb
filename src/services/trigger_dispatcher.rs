//! Trigger Dispatcher: fires `Workflow` executions from live
//! `CoordinationEvent`s, a periodic `schedule`-kind tick, and inbound
//! webhook deliveries (spec §3, §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Trigger, TriggerType};
use crate::domain::ports::trigger_repository::TriggerRepository;
use crate::services::event_bus::{CoordinationEvent, EventBus, EventTag};
use crate::services::expression::evaluate_bool;
use crate::services::workflow_engine::WorkflowEngine;

pub struct TriggerDispatcher {
    repo: Arc<dyn TriggerRepository>,
    event_bus: Arc<EventBus>,
    workflow_engine: Arc<WorkflowEngine>,
    consecutive_failure_cap: u32,
    /// Consecutive action-failure counts, per trigger id. Process-local:
    /// a restart resets the streak along with everything else in memory.
    failure_streaks: Mutex<HashMap<Uuid, u32>>,
}

impl TriggerDispatcher {
    pub fn new(repo: Arc<dyn TriggerRepository>, event_bus: Arc<EventBus>, workflow_engine: Arc<WorkflowEngine>, consecutive_failure_cap: u32) -> Self {
        Self { repo, event_bus, workflow_engine, consecutive_failure_cap, failure_streaks: Mutex::new(HashMap::new()) }
    }

    pub async fn create_trigger(&self, trigger: Trigger) -> DomainResult<Trigger> {
        self.repo.create(&trigger).await?;
        Ok(trigger)
    }

    pub async fn get_trigger(&self, id: Uuid) -> DomainResult<Trigger> {
        self.repo.get(id).await?.ok_or_else(|| DomainError::not_found("trigger", id))
    }

    pub async fn delete_trigger(&self, id: Uuid) -> DomainResult<()> {
        self.repo.delete(id).await
    }

    pub async fn list_triggers(&self) -> DomainResult<Vec<Trigger>> {
        self.repo.list().await
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> DomainResult<Trigger> {
        let mut trigger = self.repo.get(id).await?.ok_or_else(|| DomainError::not_found("trigger", id))?;
        trigger.enabled = enabled;
        self.repo.update(&trigger).await?;
        Ok(trigger)
    }

    /// Records an inbound webhook delivery against a `webhook`-kind trigger;
    /// the next `process_triggers` tick picks it up and fires.
    pub async fn record_webhook_delivery(&self, id: Uuid) -> DomainResult<()> {
        let mut trigger = self.repo.get(id).await?.ok_or_else(|| DomainError::not_found("trigger", id))?;
        if trigger.trigger_type != TriggerType::Webhook {
            return Err(DomainError::WrongState(format!("trigger {id} is not a webhook trigger")));
        }
        trigger.pending_webhook = true;
        self.repo.update(&trigger).await
    }

    /// Handles one live bus event: looks up enabled `event`/`blackboard`
    /// triggers whose configured source matches this event and evaluates
    /// each against the event payload.
    pub async fn handle_event(&self, event: &CoordinationEvent) -> DomainResult<()> {
        let tag_name = event_tag_name(event.tag);

        for trigger in self.repo.list_enabled_by_type(TriggerType::Event).await? {
            if trigger.bus_event() == Some(tag_name) {
                self.try_fire(trigger, &event.payload).await?;
            }
        }

        if event.tag == EventTag::BlackboardPosted {
            for trigger in self.repo.list_enabled_by_type(TriggerType::Blackboard).await? {
                if blackboard_trigger_matches(&trigger, &event.payload) {
                    self.try_fire(trigger, &event.payload).await?;
                }
            }
        }
        Ok(())
    }

    /// Periodic tick: evaluates every enabled `schedule` trigger whose
    /// interval has elapsed, and every enabled `webhook` trigger with a
    /// pending delivery.
    pub async fn process_triggers(&self) -> DomainResult<()> {
        let now = chrono::Utc::now();
        for trigger in self.repo.list_enabled_by_type(TriggerType::Schedule).await? {
            if trigger.schedule_due(now) {
                self.try_fire(trigger, &json!({})).await?;
            }
        }
        for trigger in self.repo.list_enabled_by_type(TriggerType::Webhook).await? {
            if trigger.pending_webhook {
                self.try_fire(trigger, &json!({})).await?;
            }
        }
        Ok(())
    }

    async fn try_fire(&self, mut trigger: Trigger, payload: &serde_json::Value) -> DomainResult<()> {
        if !trigger.enabled || !trigger.cooldown_elapsed(chrono::Utc::now()) {
            return Ok(());
        }
        if let Some(condition) = &trigger.condition {
            match evaluate_bool(&condition.expression, payload) {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => return self.record_failure(trigger, &e.to_string()).await,
            }
        }

        let inputs = derive_inputs(payload);
        let reason = format!("trigger:{}", trigger.trigger_type.as_str());
        let result = self.workflow_engine.start_workflow(trigger.workflow_id, reason, inputs, None).await;
        match result {
            Ok(_) => {
                self.failure_streaks.lock().await.remove(&trigger.id);
                trigger.record_fire(chrono::Utc::now());
                self.repo.update(&trigger).await?;
                self.event_bus.publish(
                    EventTag::TriggerFired,
                    json!({ "trigger_id": trigger.id, "name": trigger.name, "workflow_id": trigger.workflow_id }),
                );
                Ok(())
            }
            Err(e) => self.record_failure(trigger, &e.to_string()).await,
        }
    }

    /// Fire-and-log: `startWorkflow` failures never propagate past the
    /// dispatcher. After `consecutive_failure_cap` consecutive misfires the
    /// trigger is disabled so a persistently broken target stops retrying
    /// forever.
    async fn record_failure(&self, mut trigger: Trigger, error: &str) -> DomainResult<()> {
        tracing::warn!(trigger_id = %trigger.id, trigger_name = %trigger.name, error, "trigger failed to start its workflow");
        let mut streaks = self.failure_streaks.lock().await;
        let streak = streaks.entry(trigger.id).or_insert(0);
        *streak += 1;
        if *streak >= self.consecutive_failure_cap {
            trigger.enabled = false;
            streaks.remove(&trigger.id);
        }
        drop(streaks);
        self.repo.update(&trigger).await
    }
}

/// Snake-case name the bus tag serialises as (matches `EventTag`'s
/// `#[serde(rename_all = "snake_case")]`), for matching against
/// `trigger.bus_event()`.
fn event_tag_name(tag: EventTag) -> &'static str {
    match tag {
        EventTag::WorkerSpawned => "worker_spawned",
        EventTag::WorkerDismissed => "worker_dismissed",
        EventTag::WorkerStateChanged => "worker_state_changed",
        EventTag::WorkerOutput => "worker_output",
        EventTag::WorkerRestarted => "worker_restarted",
        EventTag::SwarmCreated => "swarm_created",
        EventTag::SwarmKilled => "swarm_killed",
        EventTag::BlackboardPosted => "blackboard_posted",
        EventTag::BlackboardArchived => "blackboard_archived",
        EventTag::SpawnEnqueued => "spawn_enqueued",
        EventTag::SpawnApproved => "spawn_approved",
        EventTag::SpawnRejected => "spawn_rejected",
        EventTag::SpawnFulfilled => "spawn_fulfilled",
        EventTag::WorkflowStarted => "workflow_started",
        EventTag::WorkflowStepReady => "workflow_step_ready",
        EventTag::WorkflowStepStarted => "workflow_step_started",
        EventTag::WorkflowStepCompleted => "workflow_step_completed",
        EventTag::WorkflowStepFailed => "workflow_step_failed",
        EventTag::WorkflowCompleted => "workflow_completed",
        EventTag::WorkflowFailed => "workflow_failed",
        EventTag::WorkflowPaused => "workflow_paused",
        EventTag::WorkflowResumed => "workflow_resumed",
        EventTag::WorkflowCancelled => "workflow_cancelled",
        EventTag::WorkflowDeadlock => "workflow_deadlock",
        EventTag::TriggerFired => "trigger_fired",
    }
}

/// `derivedInputs` passed to `startWorkflow`: the triggering payload itself,
/// wrapped so workflow inputs can reference `triggerEvent.*`.
fn derive_inputs(payload: &serde_json::Value) -> serde_json::Value {
    json!({ "triggerEvent": payload })
}

fn blackboard_trigger_matches(trigger: &Trigger, payload: &serde_json::Value) -> bool {
    let want_swarm = trigger.config.get("swarmId").and_then(serde_json::Value::as_str);
    let want_kind = trigger.config.get("messageType").and_then(serde_json::Value::as_str);
    let got_swarm = payload.get("swarm_id").and_then(serde_json::Value::as_str);
    let got_kind = payload.get("message_type").and_then(serde_json::Value::as_str);
    want_swarm.map_or(true, |w| Some(w) == got_swarm) && want_kind.map_or(true, |w| Some(w) == got_kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::checkpoint_repository::CheckpointRepository;
    use crate::domain::ports::execution_repository::{ExecutionStepRepository, WorkflowExecutionRepository};
    use crate::domain::ports::spawn_queue_repository::SpawnQueueRepository;
    use crate::domain::ports::workflow_repository::WorkflowRepository;
    use crate::infrastructure::database::connection::DatabaseConnection;
    use crate::infrastructure::database::{
        CheckpointRepositoryImpl, ExecutionStepRepositoryImpl, SpawnQueueRepositoryImpl, TriggerRepositoryImpl,
        WorkflowExecutionRepositoryImpl, WorkflowRepositoryImpl,
    };
    use crate::domain::models::{StepDefinition, StepType, Workflow};
    use crate::services::spawn_queue::SpawnQueueService;

    async fn setup() -> (TriggerDispatcher, Arc<dyn TriggerRepository>, Arc<dyn WorkflowRepository>) {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let pool = db.pool().clone();
        let trigger_repo: Arc<dyn TriggerRepository> = Arc::new(TriggerRepositoryImpl::new(pool.clone()));
        let workflow_repo: Arc<dyn WorkflowRepository> = Arc::new(WorkflowRepositoryImpl::new(pool.clone()));
        let execution_repo: Arc<dyn WorkflowExecutionRepository> = Arc::new(WorkflowExecutionRepositoryImpl::new(pool.clone()));
        let step_repo: Arc<dyn ExecutionStepRepository> = Arc::new(ExecutionStepRepositoryImpl::new(pool.clone()));
        let checkpoint_repo: Arc<dyn CheckpointRepository> = Arc::new(CheckpointRepositoryImpl::new(pool.clone()));
        let spawn_repo: Arc<dyn SpawnQueueRepository> = Arc::new(SpawnQueueRepositoryImpl::new(pool));
        let event_bus = Arc::new(EventBus::default());
        let spawn_queue = Arc::new(SpawnQueueService::new(spawn_repo, event_bus.clone()));
        let engine = Arc::new(WorkflowEngine::new(workflow_repo.clone(), execution_repo, step_repo, checkpoint_repo, spawn_queue, event_bus.clone(), 1_800));
        let dispatcher = TriggerDispatcher::new(trigger_repo.clone(), event_bus, engine, 5);
        (dispatcher, trigger_repo, workflow_repo)
    }

    fn trivial_workflow(name: &str) -> Workflow {
        Workflow::new(name, vec![StepDefinition {
            key: "a".into(), name: "a".into(), step_type: StepType::Task, depends_on: vec![],
            config: serde_json::Value::Null, guard: None, on_failure: Default::default(), max_retries: 0, timeout_ms: None,
        }])
    }

    #[tokio::test]
    async fn schedule_trigger_starts_workflow_on_tick() {
        let (dispatcher, trigger_repo, workflow_repo) = setup().await;
        let workflow = trivial_workflow("ping");
        workflow_repo.create(&workflow).await.unwrap();

        let trigger = Trigger::new("tick-ping", workflow.id, TriggerType::Schedule, json!({"intervalMs": 0}), None, None);
        trigger_repo.create(&trigger).await.unwrap();

        dispatcher.process_triggers().await.unwrap();
        let refreshed = trigger_repo.get(trigger.id).await.unwrap().unwrap();
        assert_eq!(refreshed.fire_count, 1);
    }

    #[tokio::test]
    async fn disabled_trigger_never_fires() {
        let (dispatcher, trigger_repo, workflow_repo) = setup().await;
        let workflow = trivial_workflow("noop");
        workflow_repo.create(&workflow).await.unwrap();
        let mut trigger = Trigger::new("disabled", workflow.id, TriggerType::Schedule, json!({"intervalMs": 0}), None, None);
        trigger.enabled = false;
        trigger_repo.create(&trigger).await.unwrap();

        dispatcher.process_triggers().await.unwrap();
        let refreshed = trigger_repo.get(trigger.id).await.unwrap().unwrap();
        assert_eq!(refreshed.fire_count, 0);
    }

    #[tokio::test]
    async fn cooldown_suppresses_immediate_refire() {
        let (dispatcher, trigger_repo, workflow_repo) = setup().await;
        let workflow = trivial_workflow("noop");
        workflow_repo.create(&workflow).await.unwrap();
        let trigger = Trigger::new("cooled", workflow.id, TriggerType::Schedule, json!({"intervalMs": 0}), None, Some(3_600_000));
        trigger_repo.create(&trigger).await.unwrap();

        dispatcher.process_triggers().await.unwrap();
        dispatcher.process_triggers().await.unwrap();
        let refreshed = trigger_repo.get(trigger.id).await.unwrap().unwrap();
        assert_eq!(refreshed.fire_count, 1);
    }

    #[tokio::test]
    async fn pending_webhook_delivery_fires_and_clears_flag() {
        let (dispatcher, trigger_repo, workflow_repo) = setup().await;
        let workflow = trivial_workflow("hooked");
        workflow_repo.create(&workflow).await.unwrap();
        let trigger = Trigger::new("hook", workflow.id, TriggerType::Webhook, json!({}), None, None);
        trigger_repo.create(&trigger).await.unwrap();

        dispatcher.process_triggers().await.unwrap();
        assert_eq!(trigger_repo.get(trigger.id).await.unwrap().unwrap().fire_count, 0);

        dispatcher.record_webhook_delivery(trigger.id).await.unwrap();
        dispatcher.process_triggers().await.unwrap();
        let refreshed = trigger_repo.get(trigger.id).await.unwrap().unwrap();
        assert_eq!(refreshed.fire_count, 1);
        assert!(!refreshed.pending_webhook);
    }

    #[tokio::test]
    async fn event_trigger_fires_on_matching_bus_event() {
        let (dispatcher, trigger_repo, workflow_repo) = setup().await;
        let workflow = trivial_workflow("on-crash");
        workflow_repo.create(&workflow).await.unwrap();
        let trigger = Trigger::new("notify-on-crash", workflow.id, TriggerType::Event, json!({"busEvent": "worker_state_changed"}), None, None);
        trigger_repo.create(&trigger).await.unwrap();

        let event = CoordinationEvent {
            id: Uuid::new_v4(),
            sequence: crate::services::event_bus::SequenceNumber(0),
            timestamp: chrono::Utc::now(),
            tag: EventTag::WorkerStateChanged,
            payload: json!({"worker_id": "abc"}),
        };
        dispatcher.handle_event(&event).await.unwrap();
        let refreshed = trigger_repo.get(trigger.id).await.unwrap().unwrap();
        assert_eq!(refreshed.fire_count, 1);
    }

    #[tokio::test]
    async fn repeated_start_failures_disable_the_trigger() {
        let (dispatcher, trigger_repo, workflow_repo) = setup().await;
        // Starting this workflow always fails with a missing required input,
        // since the trigger never supplies one.
        let mut workflow = trivial_workflow("needs-input");
        workflow.inputs.push(crate::domain::models::WorkflowInput { name: "target".to_string(), required: true, default: None });
        workflow_repo.create(&workflow).await.unwrap();

        let trigger = Trigger::new("broken", workflow.id, TriggerType::Schedule, json!({"intervalMs": 0}), None, None);
        trigger_repo.create(&trigger).await.unwrap();

        for _ in 0..5 {
            dispatcher.process_triggers().await.unwrap();
        }
        let refreshed = trigger_repo.get(trigger.id).await.unwrap().unwrap();
        assert!(!refreshed.enabled);
    }
}

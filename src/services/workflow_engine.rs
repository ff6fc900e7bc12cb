//! Workflow Engine: executes DAGs of heterogeneous steps against a
//! `WorkflowExecution`, driven by `processExecutions` ticks and external
//! `completeStep` calls.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::checkpoint::CheckpointStatus;
use crate::domain::models::spawn_queue::SpawnQueueStatus;
use crate::domain::models::{Checkpoint, ExecutionStatus, ExecutionStep, SpawnPayload, StepDefinition, StepStatus, StepType, Workflow, WorkflowExecution};
use crate::domain::ports::checkpoint_repository::CheckpointRepository;
use crate::domain::ports::execution_repository::{ExecutionStepRepository, WorkflowExecutionRepository};
use crate::domain::ports::workflow_repository::WorkflowRepository;
use crate::services::event_bus::{EventBus, EventTag};
use crate::services::expression::{evaluate, evaluate_bool};
use crate::services::spawn_queue::SpawnQueueService;

pub struct WorkflowEngine {
    workflow_repo: Arc<dyn WorkflowRepository>,
    execution_repo: Arc<dyn WorkflowExecutionRepository>,
    step_repo: Arc<dyn ExecutionStepRepository>,
    checkpoint_repo: Arc<dyn CheckpointRepository>,
    spawn_queue: Arc<SpawnQueueService>,
    event_bus: Arc<EventBus>,
    /// Design default 1800s (spec §4.5): how long an execution may sit with
    /// no active step before it's declared a deadlock.
    stuck_timeout_secs: u64,
}

impl WorkflowEngine {
    pub fn new(
        workflow_repo: Arc<dyn WorkflowRepository>,
        execution_repo: Arc<dyn WorkflowExecutionRepository>,
        step_repo: Arc<dyn ExecutionStepRepository>,
        checkpoint_repo: Arc<dyn CheckpointRepository>,
        spawn_queue: Arc<SpawnQueueService>,
        event_bus: Arc<EventBus>,
        stuck_timeout_secs: u64,
    ) -> Self {
        Self { workflow_repo, execution_repo, step_repo, checkpoint_repo, spawn_queue, event_bus, stuck_timeout_secs }
    }

    pub async fn start_workflow(
        &self,
        workflow_id: Uuid,
        created_by: impl Into<String>,
        inputs: Value,
        swarm_id: Option<Uuid>,
    ) -> DomainResult<WorkflowExecution> {
        let workflow = self.workflow_repo.get(workflow_id).await?.ok_or_else(|| DomainError::not_found("workflow", workflow_id))?;

        let mut merged_inputs = inputs.as_object().cloned().unwrap_or_default();
        for input in &workflow.inputs {
            if !merged_inputs.contains_key(&input.name) {
                if let Some(default) = &input.default {
                    merged_inputs.insert(input.name.clone(), default.clone());
                } else if input.required {
                    return Err(DomainError::ValidationFailure(format!("MissingRequiredInput: {}", input.name)));
                }
            }
        }

        let execution = WorkflowExecution::new(workflow_id, created_by, Value::Object(merged_inputs), swarm_id);
        self.execution_repo.create(&execution).await?;

        for step_def in &workflow.steps {
            let step = ExecutionStep::new(execution.id, step_def.key.clone(), step_def.depends_on.len() as u32);
            let became_ready = step.status == StepStatus::Ready;
            self.step_repo.create(&step).await?;
            if became_ready {
                self.event_bus.publish(EventTag::WorkflowStepReady, json!({ "execution_id": execution.id, "step_key": step_def.key }));
            }
        }

        self.event_bus.publish(EventTag::WorkflowStarted, json!({ "execution_id": execution.id, "workflow_id": workflow_id }));
        self.run_until_blocked(execution.id, &workflow).await?;
        self.execution_repo.get(execution.id).await?.ok_or_else(|| DomainError::not_found("execution", execution.id))
    }

    /// Drives forward every `running` execution: dispatches ready steps,
    /// polls `spawn`/`checkpoint` steps awaiting an external signal, and
    /// finalises executions that have gone fully terminal or stuck.
    pub async fn process_executions(&self) -> DomainResult<()> {
        for execution in self.execution_repo.list_active().await? {
            if execution.status != ExecutionStatus::Running {
                continue;
            }
            let workflow = self.workflow_repo.get(execution.workflow_id).await?.ok_or_else(|| DomainError::not_found("workflow", execution.workflow_id))?;
            self.poll_spawn_steps(&execution, &workflow).await?;
            self.poll_checkpoint_steps(&execution, &workflow).await?;
            self.run_until_blocked(execution.id, &workflow).await?;
        }
        Ok(())
    }

    /// External completion for a `task` step (also used by callers bridging
    /// `checkpoint`/`spawn` steps once their external signal has landed).
    pub async fn complete_step(&self, execution_id: Uuid, step_key: &str, output: Option<Value>, error: Option<String>) -> DomainResult<()> {
        let workflow = self.workflow_for_execution(execution_id).await?;
        let mut step = self.step_repo.get_by_key(execution_id, step_key).await?.ok_or_else(|| DomainError::not_found("execution step", step_key))?;
        if step.status != StepStatus::Running {
            return Err(DomainError::WrongState(format!("step {step_key} is {}", step.status.as_str())));
        }

        match error {
            None => self.finish_step(execution_id, &workflow, &mut step, StepStatus::Completed, output, None).await?,
            Some(err) => self.apply_failure(execution_id, &workflow, &mut step, err).await?,
        }

        self.run_until_blocked(execution_id, &workflow).await
    }

    /// Idempotent (P10): pausing an already-paused execution is a no-op
    /// success rather than a `WrongState` error.
    pub async fn pause_execution(&self, execution_id: Uuid) -> DomainResult<()> {
        let mut execution = self.get_execution(execution_id).await?;
        if execution.status == ExecutionStatus::Paused {
            return Ok(());
        }
        if execution.status != ExecutionStatus::Running {
            return Err(DomainError::WrongState(format!("execution {execution_id} is {}", execution.status.as_str())));
        }
        execution.status = ExecutionStatus::Paused;
        self.execution_repo.update(&execution).await?;
        self.event_bus.publish(EventTag::WorkflowPaused, json!({ "execution_id": execution_id }));
        Ok(())
    }

    /// Idempotent (P10): resuming an already-running execution is a no-op
    /// success rather than a `WrongState` error.
    pub async fn resume_execution(&self, execution_id: Uuid) -> DomainResult<()> {
        let mut execution = self.get_execution(execution_id).await?;
        if execution.status == ExecutionStatus::Running {
            return Ok(());
        }
        if execution.status != ExecutionStatus::Paused {
            return Err(DomainError::WrongState(format!("execution {execution_id} is {}", execution.status.as_str())));
        }
        execution.status = ExecutionStatus::Running;
        self.execution_repo.update(&execution).await?;
        self.event_bus.publish(EventTag::WorkflowResumed, json!({ "execution_id": execution_id }));
        let workflow = self.workflow_for_execution(execution_id).await?;
        self.run_until_blocked(execution_id, &workflow).await
    }

    /// Idempotent (P10): cancelling an already-cancelled execution is a
    /// no-op success; cancelling a `completed`/`failed` execution is still
    /// a `WrongState` error since there is nothing to cancel into.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> DomainResult<()> {
        let mut execution = self.get_execution(execution_id).await?;
        if execution.status == ExecutionStatus::Cancelled {
            return Ok(());
        }
        if execution.status.is_terminal() {
            return Err(DomainError::WrongState(format!("execution {execution_id} is {}", execution.status.as_str())));
        }
        for mut step in self.step_repo.list_for_execution(execution_id).await? {
            if !step.status.is_terminal() {
                step.status = StepStatus::Cancelled;
                step.ended_at = Some(Utc::now());
                self.step_repo.update(&step).await?;
            }
        }
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        self.execution_repo.update(&execution).await?;
        self.event_bus.publish(EventTag::WorkflowCancelled, json!({ "execution_id": execution_id }));
        Ok(())
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> DomainResult<WorkflowExecution> {
        self.execution_repo.get(execution_id).await?.ok_or_else(|| DomainError::not_found("execution", execution_id))
    }

    /// Manual re-dispatch of a `failed` step, bypassing its `onFailure`
    /// budget (an operator override, unlike the automatic `retry` mode
    /// `apply_failure` already handles).
    pub async fn retry_step(&self, step_id: Uuid) -> DomainResult<()> {
        let mut step = self.step_repo.get(step_id).await?.ok_or_else(|| DomainError::not_found("execution step", step_id))?;
        if step.status != StepStatus::Failed {
            return Err(DomainError::WrongState(format!("step {} is {}", step.step_key, step.status.as_str())));
        }
        let workflow = self.workflow_for_execution(step.execution_id).await?;
        step.status = StepStatus::Ready;
        step.error = None;
        step.started_at = None;
        step.ended_at = None;
        self.step_repo.update(&step).await?;
        self.event_bus.publish(EventTag::WorkflowStepReady, json!({ "execution_id": step.execution_id, "step_key": step.step_key, "manual_retry": true }));
        self.run_until_blocked(step.execution_id, &workflow).await
    }

    async fn workflow_for_execution(&self, execution_id: Uuid) -> DomainResult<Workflow> {
        let execution = self.get_execution(execution_id).await?;
        self.workflow_repo.get(execution.workflow_id).await?.ok_or_else(|| DomainError::not_found("workflow", execution.workflow_id))
    }

    // ---------------------------------------------------------- dispatch

    /// Dispatches every currently-`ready` step, then re-checks `parallel`
    /// steps for strategy satisfaction, looping until neither makes
    /// progress, then finalises the execution if it's done or stuck.
    async fn run_until_blocked(&self, execution_id: Uuid, workflow: &Workflow) -> DomainResult<()> {
        loop {
            let ready = self.step_repo.get_ready(execution_id).await?;
            let dispatched = !ready.is_empty();
            for mut step in ready {
                self.dispatch_one(execution_id, workflow, &mut step).await?;
            }
            let parallel_progressed = self.check_parallel_steps(execution_id, workflow).await?;
            if !dispatched && !parallel_progressed {
                break;
            }
        }
        self.finalize_if_done(execution_id, workflow).await
    }

    async fn dispatch_one(&self, execution_id: Uuid, workflow: &Workflow, step: &mut ExecutionStep) -> DomainResult<()> {
        let execution = self.get_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Ok(());
        }
        let step_def = workflow.steps.iter().find(|s| s.key == step.step_key).ok_or_else(|| DomainError::internal(format!("execution step {} has no definition", step.step_key)))?;
        let view = Self::context_view(&execution);

        if let Some(guard) = &step_def.guard {
            match evaluate_bool(&guard.condition, &view) {
                Ok(true) => {}
                Ok(false) => return self.finish_step(execution_id, workflow, step, StepStatus::Skipped, None, None).await,
                Err(_) => return self.finish_step(execution_id, workflow, step, StepStatus::Failed, None, Some("guard_error".to_string())).await,
            }
        }

        step.started_at = Some(Utc::now());
        match step_def.step_type {
            StepType::Task | StepType::Parallel => {
                step.status = StepStatus::Running;
                self.step_repo.update(step).await?;
                self.event_bus.publish(EventTag::WorkflowStepStarted, json!({ "execution_id": execution_id, "step_key": step.step_key, "config": step_def.config }));
                Ok(())
            }
            StepType::Spawn => self.dispatch_spawn(execution_id, step_def, step, &view).await,
            StepType::Checkpoint => self.dispatch_checkpoint(execution_id, &execution, step_def, step, &view).await,
            StepType::Gate => self.dispatch_gate(execution_id, workflow, step_def, step, &view).await,
            StepType::Script => self.dispatch_script(execution_id, workflow, &execution, step_def, step, &view).await,
        }
    }

    async fn dispatch_spawn(&self, execution_id: Uuid, step_def: &StepDefinition, step: &mut ExecutionStep, view: &Value) -> DomainResult<()> {
        let config = substitute_templates(&step_def.config, view);
        let task = config.get("task").and_then(Value::as_str).unwrap_or(&step_def.name).to_string();
        let target_agent_type = config.get("targetAgentType").and_then(Value::as_str).unwrap_or("agent").to_string();
        let priority = config.get("priority").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or_default();
        let payload = SpawnPayload { task, context: config.get("context").cloned().unwrap_or(Value::Null), checkpoint: None };

        self.spawn_queue.enqueue(spawn_requester(execution_id, &step.step_key), target_agent_type, 0, payload, priority, HashSet::new()).await?;

        step.status = StepStatus::Running;
        self.step_repo.update(step).await?;
        self.event_bus.publish(EventTag::WorkflowStepStarted, json!({ "execution_id": execution_id, "step_key": step.step_key }));
        Ok(())
    }

    async fn dispatch_checkpoint(&self, execution_id: Uuid, execution: &WorkflowExecution, step_def: &StepDefinition, step: &mut ExecutionStep, view: &Value) -> DomainResult<()> {
        let config = substitute_templates(&step_def.config, view);
        let worker_id = config
            .get("workerId")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| DomainError::ValidationFailure(format!("checkpoint step {} requires workerId", step_def.key)))?;
        let label = config.get("label").and_then(Value::as_str).unwrap_or(&step_def.key).to_string();
        let ttl_ms = config.get("ttlMs").and_then(Value::as_i64);
        let state = config.get("state").cloned().unwrap_or(Value::Null);
        let wait_for_acceptance = config.get("waitForAcceptance").and_then(Value::as_bool).unwrap_or(false);

        let checkpoint = Checkpoint::new(worker_id, execution.swarm_id, label, state, ttl_ms);
        self.checkpoint_repo.create(&checkpoint).await?;

        if wait_for_acceptance {
            step.status = StepStatus::Running;
            step.output = Some(json!({ "checkpointId": checkpoint.id }));
            self.step_repo.update(step).await?;
            self.event_bus.publish(EventTag::WorkflowStepStarted, json!({ "execution_id": execution_id, "step_key": step.step_key }));
            Ok(())
        } else {
            self.finish_step(execution_id, &self.workflow_for_execution(execution_id).await?, step, StepStatus::Completed, Some(json!({ "checkpointId": checkpoint.id })), None).await
        }
    }

    /// `onTrue`/`onFalse` are explicit branch routing, not a generic
    /// cascade from the gate's own `depends_on` edges: the false branch is
    /// marked `skipped` directly rather than left to decrement naturally.
    async fn dispatch_gate(&self, execution_id: Uuid, workflow: &Workflow, step_def: &StepDefinition, step: &mut ExecutionStep, view: &Value) -> DomainResult<()> {
        let config = &step_def.config;
        let condition = config.get("condition").and_then(Value::as_str).unwrap_or_default();

        let result = match evaluate_bool(condition, view) {
            Ok(b) => b,
            Err(_) => {
                step.status = StepStatus::Failed;
                step.error = Some("guard_error".to_string());
                step.ended_at = Some(Utc::now());
                self.step_repo.update(step).await?;
                self.event_bus.publish(EventTag::WorkflowStepFailed, json!({ "execution_id": execution_id, "step_key": step.step_key, "error": "guard_error" }));
                return Ok(());
            }
        };

        let (release_keys, skip_keys) = if result {
            (string_array(config, "onTrue"), string_array(config, "onFalse"))
        } else {
            (string_array(config, "onFalse"), string_array(config, "onTrue"))
        };

        for key in &release_keys {
            self.release_one(execution_id, key).await?;
        }
        for key in &skip_keys {
            if let Some(mut dependent) = self.step_repo.get_by_key(execution_id, key).await? {
                if !dependent.status.is_terminal() {
                    self.finish_step(execution_id, workflow, &mut dependent, StepStatus::Skipped, None, None).await?;
                }
            }
        }

        step.status = StepStatus::Completed;
        step.output = Some(json!({ "result": result }));
        step.ended_at = Some(Utc::now());
        self.step_repo.update(step).await?;
        self.event_bus.publish(EventTag::WorkflowStepCompleted, json!({ "execution_id": execution_id, "step_key": step.step_key, "output": step.output }));
        Ok(())
    }

    async fn dispatch_script(&self, execution_id: Uuid, workflow: &Workflow, execution: &WorkflowExecution, step_def: &StepDefinition, step: &mut ExecutionStep, view: &Value) -> DomainResult<()> {
        let config = &step_def.config;
        let expression = config.get("expression").and_then(Value::as_str).unwrap_or_default();
        let output_key = config.get("outputKey").and_then(Value::as_str).unwrap_or("result");

        match evaluate(expression, view) {
            Ok(result) => {
                let mut execution = execution.clone();
                let context_obj = execution.context.as_object_mut().expect("execution context is always an object");
                let inner = context_obj.entry("context").or_insert_with(|| json!({})).as_object_mut().expect("context.context is always an object");
                inner.insert(output_key.to_string(), result.clone());
                self.execution_repo.update(&execution).await?;
                self.finish_step(execution_id, workflow, step, StepStatus::Completed, Some(result), None).await
            }
            Err(e) => self.finish_step(execution_id, workflow, step, StepStatus::Failed, None, Some(format!("script_error: {e}"))).await,
        }
    }

    /// Decrements `blockedByCount` on `dependent_key` and flips it `ready`
    /// if it reaches zero, without requiring the dependent's own
    /// dependencies to have all completed (used by gate branch routing,
    /// where the gate itself is the sole gate on that edge).
    async fn release_one(&self, execution_id: Uuid, dependent_key: &str) -> DomainResult<()> {
        if let Some(mut dependent) = self.step_repo.get_by_key(execution_id, dependent_key).await? {
            if dependent.blocked_by_count > 0 {
                dependent.blocked_by_count -= 1;
            }
            if dependent.blocked_by_count == 0 && dependent.status == StepStatus::Pending {
                dependent.status = StepStatus::Ready;
                self.event_bus.publish(EventTag::WorkflowStepReady, json!({ "execution_id": execution_id, "step_key": dependent_key }));
            }
            self.step_repo.update(&dependent).await?;
        }
        Ok(())
    }

    /// Finalises `step` to a terminal status, records its output/error into
    /// the execution context, and cascades release to dependents. `status`
    /// must be one of the terminal `StepStatus` variants.
    async fn finish_step(&self, execution_id: Uuid, workflow: &Workflow, step: &mut ExecutionStep, status: StepStatus, output: Option<Value>, error: Option<String>) -> DomainResult<()> {
        step.status = status;
        step.output = output.clone();
        step.error = error.clone();
        step.ended_at = Some(Utc::now());
        self.step_repo.update(step).await?;

        let mut execution = self.get_execution(execution_id).await?;
        let context_obj = execution.context.as_object_mut().expect("execution context is always an object");
        let steps_obj = context_obj.entry("steps").or_insert_with(|| json!({})).as_object_mut().expect("context.steps is always an object");
        steps_obj.insert(step.step_key.clone(), json!({ "output": output, "status": status.as_str() }));
        self.execution_repo.update(&execution).await?;

        let tag = match status {
            StepStatus::Completed => EventTag::WorkflowStepCompleted,
            StepStatus::Failed => EventTag::WorkflowStepFailed,
            _ => EventTag::WorkflowStepCompleted,
        };
        self.event_bus.publish(tag, json!({ "execution_id": execution_id, "step_key": step.step_key, "status": status.as_str() }));

        if status.releases_dependents() {
            self.cascade_release(execution_id, workflow, &step.step_key).await?;
        }
        Ok(())
    }

    /// Applies `onFailure` for a step that errored (task failure, spawn or
    /// checkpoint rejection). `retry` re-dispatches in place of a terminal
    /// transition if the budget allows; `continue` is terminal `failed` but
    /// still releases dependents, unlike every other failure path.
    async fn apply_failure(&self, execution_id: Uuid, workflow: &Workflow, step: &mut ExecutionStep, error: String) -> DomainResult<()> {
        let step_def = workflow.steps.iter().find(|s| s.key == step.step_key).ok_or_else(|| DomainError::internal(format!("execution step {} has no definition", step.step_key)))?;

        use crate::domain::models::OnFailure;
        match step_def.on_failure {
            OnFailure::Retry if step.retry_count < step_def.max_retries => {
                step.retry_count += 1;
                step.status = StepStatus::Ready;
                step.error = Some(error);
                self.step_repo.update(step).await?;
                self.event_bus.publish(EventTag::WorkflowStepReady, json!({ "execution_id": execution_id, "step_key": step.step_key, "retry_count": step.retry_count }));
                Ok(())
            }
            OnFailure::Skip => self.finish_step(execution_id, workflow, step, StepStatus::Skipped, None, Some(error)).await,
            OnFailure::Continue => {
                self.finish_step(execution_id, workflow, step, StepStatus::Failed, None, Some(error.clone())).await?;
                self.cascade_release(execution_id, workflow, &step.step_key).await
            }
            OnFailure::Fail | OnFailure::Retry => {
                step.status = StepStatus::Failed;
                step.error = Some(error.clone());
                step.ended_at = Some(Utc::now());
                self.step_repo.update(step).await?;
                self.event_bus.publish(EventTag::WorkflowStepFailed, json!({ "execution_id": execution_id, "step_key": step.step_key, "error": error }));
                self.cancel_non_terminal_except(execution_id, &step.step_key).await?;
                Ok(())
            }
        }
    }

    async fn cancel_non_terminal_except(&self, execution_id: Uuid, except_key: &str) -> DomainResult<()> {
        for mut other in self.step_repo.list_for_execution(execution_id).await? {
            if other.step_key != except_key && !other.status.is_terminal() {
                other.status = StepStatus::Cancelled;
                other.ended_at = Some(Utc::now());
                self.step_repo.update(&other).await?;
            }
        }
        Ok(())
    }

    async fn cascade_release(&self, execution_id: Uuid, workflow: &Workflow, completed_key: &str) -> DomainResult<()> {
        for step_def in &workflow.steps {
            if step_def.depends_on.iter().any(|d| d == completed_key) {
                self.release_one(execution_id, &step_def.key).await?;
            }
        }
        Ok(())
    }

    /// Checks every non-terminal `parallel` step against its strategy.
    /// Returns `true` if any made progress (so the outer loop knows to
    /// re-check for newly-ready steps).
    async fn check_parallel_steps(&self, execution_id: Uuid, workflow: &Workflow) -> DomainResult<bool> {
        let mut progressed = false;
        for step_def in &workflow.steps {
            if step_def.step_type != StepType::Parallel {
                continue;
            }
            let Some(mut step) = self.step_repo.get_by_key(execution_id, &step_def.key).await? else { continue };
            if step.status != StepStatus::Running {
                continue;
            }

            let member_keys = string_array(&step_def.config, "steps");
            let strategy = step_def.config.get("strategy").and_then(Value::as_str).unwrap_or("all");
            let mut members = Vec::with_capacity(member_keys.len());
            for key in &member_keys {
                if let Some(member) = self.step_repo.get_by_key(execution_id, key).await? {
                    members.push(member);
                }
            }

            let satisfied = match strategy {
                "any" => members.iter().any(|m| m.status == StepStatus::Completed),
                "race" => members.iter().any(|m| m.status.is_terminal()),
                _ => members.iter().all(|m| m.status.is_terminal()),
            };
            if !satisfied {
                continue;
            }

            if strategy == "race" {
                for member in &members {
                    if !member.status.is_terminal() {
                        let mut cancelled = member.clone();
                        cancelled.status = StepStatus::Cancelled;
                        cancelled.ended_at = Some(Utc::now());
                        self.step_repo.update(&cancelled).await?;
                    }
                }
            }

            let failed = strategy == "all" && members.iter().any(|m| m.status == StepStatus::Failed);
            step.output = Some(json!({ "members": members.iter().map(|m| json!({ "key": m.step_key, "status": m.status.as_str() })).collect::<Vec<_>>() }));
            if failed {
                self.finish_step(execution_id, workflow, &mut step, StepStatus::Failed, step.output.clone(), Some("parallel_member_failed".to_string())).await?;
            } else {
                let output = step.output.clone();
                self.finish_step(execution_id, workflow, &mut step, StepStatus::Completed, output, None).await?;
            }
            progressed = true;
        }
        Ok(progressed)
    }

    /// Bridges `spawn` steps to the corresponding `SpawnQueueItem`: polls by
    /// the convention-encoded requester handle and completes the step once
    /// the item reaches a terminal status.
    async fn poll_spawn_steps(&self, execution: &WorkflowExecution, workflow: &Workflow) -> DomainResult<()> {
        for step_def in &workflow.steps {
            if step_def.step_type != StepType::Spawn {
                continue;
            }
            let Some(step) = self.step_repo.get_by_key(execution.id, &step_def.key).await? else { continue };
            if step.status != StepStatus::Running {
                continue;
            }
            let handle = spawn_requester(execution.id, &step_def.key);
            for item in self.spawn_queue.list_by_requester(&handle).await? {
                match item.status {
                    SpawnQueueStatus::Spawned => {
                        self.complete_step(execution.id, &step_def.key, Some(json!({ "workerId": item.spawned_worker_id })), None).await?;
                    }
                    SpawnQueueStatus::Rejected => {
                        self.complete_step(execution.id, &step_def.key, None, Some("spawn_rejected".to_string())).await?;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    async fn poll_checkpoint_steps(&self, execution: &WorkflowExecution, workflow: &Workflow) -> DomainResult<()> {
        for step_def in &workflow.steps {
            if step_def.step_type != StepType::Checkpoint {
                continue;
            }
            let Some(step) = self.step_repo.get_by_key(execution.id, &step_def.key).await? else { continue };
            if step.status != StepStatus::Running {
                continue;
            }
            let Some(checkpoint_id) = step.output.as_ref().and_then(|o| o.get("checkpointId")).and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok()) else { continue };
            let Some(checkpoint) = self.checkpoint_repo.get(checkpoint_id).await? else { continue };

            match checkpoint.status {
                CheckpointStatus::Accepted => {
                    self.complete_step(execution.id, &step_def.key, Some(json!({ "checkpointId": checkpoint_id })), None).await?;
                }
                CheckpointStatus::Rejected | CheckpointStatus::Expired => {
                    self.complete_step(execution.id, &step_def.key, None, Some("checkpoint_rejected".to_string())).await?;
                }
                CheckpointStatus::Pending => {}
            }
        }
        Ok(())
    }

    /// Completion detection (spec §4.5): once every step is terminal, the
    /// execution's final status is derived from the worst outcome present.
    /// If the dispatch loop stalled with non-terminal steps remaining and
    /// nothing running or ready, the execution is marked stalled; it only
    /// becomes a deadlock once it has sat stalled for `stuck_timeout_secs`
    /// (design default 1800s), giving a `running` task/spawn/checkpoint
    /// step room to report back before the engine gives up on it.
    async fn finalize_if_done(&self, execution_id: Uuid, _workflow: &Workflow) -> DomainResult<()> {
        let mut execution = self.get_execution(execution_id).await?;
        if execution.status != ExecutionStatus::Running {
            return Ok(());
        }
        let steps = self.step_repo.list_for_execution(execution_id).await?;
        let all_terminal = steps.iter().all(|s| s.status.is_terminal());

        if all_terminal {
            let outcome = if steps.iter().any(|s| s.status == StepStatus::Failed) {
                (ExecutionStatus::Failed, EventTag::WorkflowFailed)
            } else if steps.iter().any(|s| s.status == StepStatus::Cancelled) {
                (ExecutionStatus::Cancelled, EventTag::WorkflowCancelled)
            } else {
                (ExecutionStatus::Completed, EventTag::WorkflowCompleted)
            };
            execution.status = outcome.0;
            execution.completed_at = Some(Utc::now());
            execution.stalled_since = None;
            self.execution_repo.update(&execution).await?;
            self.event_bus.publish(outcome.1, json!({ "execution_id": execution_id, "status": execution.status.as_str() }));
            return Ok(());
        }

        let any_active = steps.iter().any(|s| matches!(s.status, StepStatus::Ready | StepStatus::Running));
        if any_active {
            if execution.stalled_since.is_some() {
                execution.stalled_since = None;
                self.execution_repo.update(&execution).await?;
            }
            return Ok(());
        }

        let now = Utc::now();
        let Some(stalled_since) = execution.stalled_since else {
            execution.stalled_since = Some(now);
            self.execution_repo.update(&execution).await?;
            return Ok(());
        };

        if (now - stalled_since).num_seconds() as u64 >= self.stuck_timeout_secs {
            execution.status = ExecutionStatus::Failed;
            execution.completed_at = Some(now);
            execution.error = Some("deadlock".to_string());
            execution.stalled_since = None;
            self.execution_repo.update(&execution).await?;
            self.event_bus.publish(EventTag::WorkflowDeadlock, json!({ "execution_id": execution_id, "error": "deadlock" }));
        }
        Ok(())
    }

    fn context_view(execution: &WorkflowExecution) -> Value {
        let mut view = execution.context.clone();
        if let Some(obj) = view.as_object_mut() {
            obj.insert("swarmId".to_string(), execution.swarm_id.map(|id| json!(id)).unwrap_or(Value::Null));
            obj.insert("executionId".to_string(), json!(execution.id));
        }
        view
    }
}

fn spawn_requester(execution_id: Uuid, step_key: &str) -> String {
    format!("workflow:{execution_id}:{step_key}")
}

fn string_array(config: &Value, field: &str) -> Vec<String> {
    config.get(field).and_then(Value::as_array).map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default()
}

/// Replaces `{{ident}}` in every string value of `config` with
/// `inputs.ident` from the execution context. Missing keys become empty
/// strings; this never fails the dispatch (spec §4.5 template substitution).
fn substitute_templates(config: &Value, context: &Value) -> Value {
    match config {
        Value::String(s) => substitute_in_string(s, context),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_templates(v, context)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), substitute_templates(v, context))).collect()),
        other => other.clone(),
    }
}

fn substitute_in_string(s: &str, context: &Value) -> Value {
    let trimmed = s.trim();
    if trimmed.starts_with("{{") && trimmed.ends_with("}}") && trimmed.matches("{{").count() == 1 {
        return resolve_input(trimmed.trim_start_matches("{{").trim_end_matches("}}").trim(), context);
    }

    let mut result = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let ident = after[..end].trim();
                match resolve_input(ident, context) {
                    Value::String(s) => result.push_str(&s),
                    Value::Null => {
                        tracing::warn!(ident, "template substitution missing input, using empty string");
                    }
                    other => result.push_str(&other.to_string()),
                }
                rest = &after[end + 2..];
            }
            None => {
                result.push_str("{{");
                rest = after;
                break;
            }
        }
    }
    result.push_str(rest);
    Value::String(result)
}

fn resolve_input(ident: &str, context: &Value) -> Value {
    let path = format!("inputs.{ident}");
    evaluate(&path, context).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Guard, OnFailure, StepConfig, StepType, WorkflowInput};
    use crate::infrastructure::database::connection::DatabaseConnection;
    use crate::infrastructure::database::{CheckpointRepositoryImpl, ExecutionStepRepositoryImpl, SpawnQueueRepositoryImpl, WorkflowExecutionRepositoryImpl, WorkflowRepositoryImpl};
    use crate::domain::ports::spawn_queue_repository::SpawnQueueRepository;

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

    async fn setup() -> (WorkflowEngine, std::sync::Arc<dyn WorkflowRepository>) {
        setup_with_stuck_timeout(1_800).await
    }

    async fn setup_with_stuck_timeout(stuck_timeout_secs: u64) -> (WorkflowEngine, std::sync::Arc<dyn WorkflowRepository>) {
        let db = DatabaseConnection::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let pool = db.pool().clone();
        let workflow_repo: Arc<dyn WorkflowRepository> = Arc::new(WorkflowRepositoryImpl::new(pool.clone()));
        let execution_repo: Arc<dyn WorkflowExecutionRepository> = Arc::new(WorkflowExecutionRepositoryImpl::new(pool.clone()));
        let step_repo: Arc<dyn ExecutionStepRepository> = Arc::new(ExecutionStepRepositoryImpl::new(pool.clone()));
        let checkpoint_repo: Arc<dyn CheckpointRepository> = Arc::new(CheckpointRepositoryImpl::new(pool.clone()));
        let spawn_repo: Arc<dyn SpawnQueueRepository> = Arc::new(SpawnQueueRepositoryImpl::new(pool));
        let event_bus = Arc::new(EventBus::default());
        let spawn_queue = Arc::new(SpawnQueueService::new(spawn_repo, event_bus.clone()));
        let engine = WorkflowEngine::new(workflow_repo.clone(), execution_repo, step_repo, checkpoint_repo, spawn_queue, event_bus, stuck_timeout_secs);
        (engine, workflow_repo)
    }

    #[tokio::test]
    async fn task_workflow_runs_to_completion_via_complete_step() {
        let (engine, workflow_repo) = setup().await;
        let workflow = Workflow::new("greet", vec![step("a", StepType::Task, &[], Value::Null)]);
        workflow_repo.create(&workflow).await.unwrap();

        let execution = engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);

        engine.complete_step(execution.id, "a", Some(json!({"ok": true})), None).await.unwrap();
        let execution = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn gate_true_branch_skips_false_branch() {
        let (engine, workflow_repo) = setup().await;
        let mut workflow = Workflow::new(
            "gated",
            vec![
                step("check", StepType::Task, &[], Value::Null),
                step("gate", StepType::Gate, &["check"], json!({"condition": "steps.check.output.approved === true", "onTrue": ["proceed"], "onFalse": ["reject"]})),
                step("proceed", StepType::Task, &["gate"], Value::Null),
                step("reject", StepType::Task, &["gate"], Value::Null),
            ],
        );
        workflow.validate().unwrap();
        workflow_repo.create(&workflow).await.unwrap();

        let execution = engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();
        engine.complete_step(execution.id, "check", Some(json!({"approved": true})), None).await.unwrap();

        let steps = engine.step_repo.list_for_execution(execution.id).await.unwrap();
        let by_key = |k: &str| steps.iter().find(|s| s.step_key == k).unwrap().clone();
        assert_eq!(by_key("gate").status, StepStatus::Completed);
        assert!(matches!(by_key("proceed").status, StepStatus::Ready | StepStatus::Running));
        assert_eq!(by_key("reject").status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn guard_false_skips_step_and_releases_dependents() {
        let (engine, workflow_repo) = setup().await;
        let mut step_b = step("b", StepType::Task, &["a"], Value::Null);
        step_b.guard = Some(Guard { condition: "inputs.go === true".to_string(), variables: Value::Null });
        let workflow = Workflow::new("guarded", vec![step("a", StepType::Task, &[], Value::Null), step_b, step("c", StepType::Task, &["b"], Value::Null)]);
        workflow_repo.create(&workflow).await.unwrap();

        let execution = engine.start_workflow(workflow.id, "tester", json!({"go": false}), None).await.unwrap();
        engine.complete_step(execution.id, "a", Some(json!({})), None).await.unwrap();

        let steps = engine.step_repo.list_for_execution(execution.id).await.unwrap();
        let b = steps.iter().find(|s| s.step_key == "b").unwrap();
        let c = steps.iter().find(|s| s.step_key == "c").unwrap();
        assert_eq!(b.status, StepStatus::Skipped);
        assert!(matches!(c.status, StepStatus::Ready | StepStatus::Running));
    }

    #[tokio::test]
    async fn script_step_writes_context_and_completes_immediately() {
        let (engine, workflow_repo) = setup().await;
        let workflow = Workflow::new("scripted", vec![step("calc", StepType::Script, &[], json!({"expression": "2 + 3", "outputKey": "sum"}))]);
        workflow_repo.create(&workflow).await.unwrap();

        let execution = engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();
        let execution = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.context["context"]["sum"], json!(5.0));
    }

    #[tokio::test]
    async fn missing_required_input_fails_start() {
        let (engine, workflow_repo) = setup().await;
        let mut workflow = Workflow::new("needs-input", vec![step("a", StepType::Task, &[], Value::Null)]);
        workflow.inputs.push(WorkflowInput { name: "target".to_string(), required: true, default: None });
        workflow_repo.create(&workflow).await.unwrap();

        let result = engine.start_workflow(workflow.id, "tester", json!({}), None).await;
        assert!(matches!(result, Err(DomainError::ValidationFailure(_))));
    }

    #[tokio::test]
    async fn retry_then_exhaust_fails_execution() {
        let (engine, workflow_repo) = setup().await;
        let mut retried = step("a", StepType::Task, &[], Value::Null);
        retried.on_failure = OnFailure::Retry;
        retried.max_retries = 1;
        let workflow = Workflow::new("retrying", vec![retried]);
        workflow_repo.create(&workflow).await.unwrap();

        let execution = engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();
        engine.complete_step(execution.id, "a", None, Some("boom".to_string())).await.unwrap();
        let steps = engine.step_repo.list_for_execution(execution.id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Ready);
        assert_eq!(steps[0].retry_count, 1);

        engine.complete_step(execution.id, "a", None, Some("boom again".to_string())).await.unwrap();
        let execution = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_marks_all_non_terminal_steps_cancelled() {
        let (engine, workflow_repo) = setup().await;
        let workflow = Workflow::new("cancel-me", vec![step("a", StepType::Task, &[], Value::Null), step("b", StepType::Task, &["a"], Value::Null)]);
        workflow_repo.create(&workflow).await.unwrap();

        let execution = engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();
        engine.cancel_execution(execution.id).await.unwrap();
        let execution = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        let steps = engine.step_repo.list_for_execution(execution.id).await.unwrap();
        assert!(steps.iter().all(|s| s.status == StepStatus::Cancelled));
    }

    #[tokio::test]
    async fn undispatchable_cycle_stalls_before_deadlocking() {
        let (engine, workflow_repo) = setup_with_stuck_timeout(1_800).await;
        let workflow = Workflow::new("orphaned", vec![step("b", StepType::Task, &["nonexistent"], Value::Null)]);
        workflow_repo.create(&workflow).await.unwrap();

        let execution = engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();
        let execution = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.stalled_since.is_some());
    }

    #[tokio::test]
    async fn stalled_execution_deadlocks_once_timeout_elapsed() {
        let (engine, workflow_repo) = setup_with_stuck_timeout(0).await;
        let workflow = Workflow::new("orphaned", vec![step("b", StepType::Task, &["nonexistent"], Value::Null)]);
        workflow_repo.create(&workflow).await.unwrap();

        let execution = engine.start_workflow(workflow.id, "tester", json!({}), None).await.unwrap();
        // A zero stuck-timeout still requires a second tick: the first tick
        // only records `stalled_since`.
        engine.process_executions().await.unwrap();
        let execution = engine.get_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("deadlock"));
    }
}

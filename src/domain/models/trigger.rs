//! Trigger domain model — a rule that starts a `Workflow` once its firing
//! condition is satisfied (spec §3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The firing condition a trigger evaluates. `config` carries the
/// per-type parameters (interval, bus event name, blackboard filter) as
/// opaque JSON, interpreted by the dispatcher at evaluation time — the
/// same "typed enum tag, opaque config payload" split `StepDefinition`
/// uses for its own `step_type`/`config` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fires on a matching `CoordinationEvent` (`config.busEvent` names the tag).
    Event,
    /// Fires once `config.intervalMs` has elapsed since `lastFiredAt`.
    Schedule,
    /// Fires when a pending webhook delivery record exists for this trigger,
    /// populated by the HTTP surface rather than evaluated locally.
    Webhook,
    /// Fires on a new blackboard message matching `config.swarmId` /
    /// `config.messageType` since `lastFiredAt`.
    Blackboard,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Schedule => "schedule",
            Self::Webhook => "webhook",
            Self::Blackboard => "blackboard",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            "schedule" => Ok(Self::Schedule),
            "webhook" => Ok(Self::Webhook),
            "blackboard" => Ok(Self::Blackboard),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// A condition expression evaluated in the same sandbox as `script`/`gate`
/// steps, against the derived inputs that would be handed to `startWorkflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub expression: String,
}

/// An event-condition-action rule: on fire, always starts `workflow_id`
/// (spec §4.6, "on fire: call `startWorkflow(workflowId, ...)`"). Disabled
/// triggers are retained but never evaluated by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub name: String,
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    /// Per-`trigger_type` parameters; shape depends on `trigger_type`.
    pub config: serde_json::Value,
    pub condition: Option<TriggerCondition>,
    pub enabled: bool,
    /// Minimum interval between consecutive fires, suppressing bursts.
    pub cooldown_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: u64,
    /// Set by the HTTP surface when a webhook delivery lands for this
    /// trigger; cleared once the `webhook`-type trigger fires on it.
    pub pending_webhook: bool,
}

impl Trigger {
    pub fn new(
        name: impl Into<String>,
        workflow_id: Uuid,
        trigger_type: TriggerType,
        config: serde_json::Value,
        condition: Option<TriggerCondition>,
        cooldown_ms: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            workflow_id,
            trigger_type,
            config,
            condition,
            enabled: true,
            cooldown_ms,
            created_at: Utc::now(),
            last_fired_at: None,
            fire_count: 0,
            pending_webhook: false,
        }
    }

    /// Whether enough time has elapsed since the last fire to fire again.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match (self.cooldown_ms, self.last_fired_at) {
            (Some(cooldown), Some(last)) => now.signed_duration_since(last).num_milliseconds() >= cooldown as i64,
            _ => true,
        }
    }

    /// `config.intervalMs` elapsed since `lastFiredAt` (or since creation,
    /// if it has never fired). Only meaningful for `TriggerType::Schedule`.
    pub fn schedule_due(&self, now: DateTime<Utc>) -> bool {
        let Some(interval_ms) = self.config.get("intervalMs").and_then(serde_json::Value::as_i64) else {
            return false;
        };
        let since = self.last_fired_at.unwrap_or(self.created_at);
        now.signed_duration_since(since).num_milliseconds() >= interval_ms
    }

    /// `config.busEvent` this `event`-type trigger subscribes to.
    pub fn bus_event(&self) -> Option<&str> {
        self.config.get("busEvent").and_then(serde_json::Value::as_str)
    }

    pub fn record_fire(&mut self, at: DateTime<Utc>) {
        self.last_fired_at = Some(at);
        self.fire_count += 1;
        self.pending_webhook = false;
    }
}

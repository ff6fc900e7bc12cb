//! WorkflowExecution and ExecutionStep — mutable runtime state for a DAG run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
    Blocked,
    Cancelled,
}

impl StepStatus {
    /// Terminal set per spec §3: `{completed, failed, skipped, cancelled}`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled)
    }

    /// Released from a dependent's perspective: a dependency in this set no
    /// longer counts towards `blocked_by_count`.
    pub fn releases_dependents(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "blocked" => Ok(Self::Blocked),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// Mutable runtime record for one execution of a `Workflow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub created_by: String,
    pub status: ExecutionStatus,
    /// Merged inputs plus `steps.<key>.output`, written as steps complete.
    pub context: serde_json::Value,
    pub swarm_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Root-cause error surfaced on the execution's final record when it
    /// fails (spec §7, "user-visible failure behaviour").
    pub error: Option<String>,
    /// When the execution first observed no `ready`/`running` step with
    /// steps still non-terminal. Cleared once the execution makes progress
    /// again or goes terminal; used to honour `stuckTimeoutMs` before
    /// declaring a deadlock (spec §4.5).
    pub stalled_since: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: Uuid, created_by: impl Into<String>, inputs: serde_json::Value, swarm_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            created_by: created_by.into(),
            status: ExecutionStatus::Running,
            context: serde_json::json!({ "inputs": inputs, "steps": {} }),
            swarm_id,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            stalled_since: None,
        }
    }
}

/// One runtime record per `StepDefinition` per execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_key: String,
    pub status: StepStatus,
    pub blocked_by_count: u32,
    pub retry_count: u32,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionStep {
    pub fn new(execution_id: Uuid, step_key: impl Into<String>, dependency_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_key: step_key.into(),
            status: if dependency_count == 0 { StepStatus::Ready } else { StepStatus::Pending },
            blocked_by_count: dependency_count,
            retry_count: 0,
            output: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }
}

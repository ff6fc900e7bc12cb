//! SpawnQueueItem domain model — priority + dependency admission for spawns.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed priority ranks; `getReady` orders `critical > high > normal > low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Higher rank sorts first. Kept separate from `Ord` derive ordering
    /// (which is ascending `Low..Critical`) so callers can read intent at
    /// the call site instead of relying on enum declaration order.
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnQueueStatus {
    Pending,
    Approved,
    Rejected,
    Spawned,
}

impl SpawnQueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Spawned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Spawned => "spawned",
        }
    }
}

impl std::str::FromStr for SpawnQueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "spawned" => Ok(Self::Spawned),
            other => Err(format!("unknown spawn queue status: {other}")),
        }
    }
}

/// Task payload carried by a spawn request: what to do, with what context,
/// and an optional session-handoff checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnPayload {
    pub task: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub checkpoint: Option<serde_json::Value>,
}

/// A gated spawn request. `blocked_by_count` is a cached count of
/// `depends_on` entries whose status is not `Spawned`; it must equal that
/// count at every observable instant (P2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnQueueItem {
    pub id: Uuid,
    pub requester_handle: String,
    pub target_agent_type: String,
    pub depth_level: u32,
    pub priority: Priority,
    pub status: SpawnQueueStatus,
    pub payload: SpawnPayload,
    pub depends_on: HashSet<Uuid>,
    pub blocked_by_count: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub spawned_worker_id: Option<Uuid>,
}

impl SpawnQueueItem {
    /// `blocked_by_count` is computed from the status of the dependency
    /// items passed in, per the invariant in spec §4.3.
    pub fn new(
        requester_handle: impl Into<String>,
        target_agent_type: impl Into<String>,
        depth_level: u32,
        payload: SpawnPayload,
        priority: Priority,
        depends_on: HashSet<Uuid>,
        unresolved_dependency_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_handle: requester_handle.into(),
            target_agent_type: target_agent_type.into(),
            depth_level,
            priority,
            status: SpawnQueueStatus::Pending,
            payload,
            depends_on,
            blocked_by_count: unresolved_dependency_count,
            created_at: Utc::now(),
            processed_at: None,
            spawned_worker_id: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SpawnQueueStatus::Pending && self.blocked_by_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_orders_critical_highest() {
        assert!(Priority::Critical.rank() > Priority::High.rank());
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
    }

    #[test]
    fn item_with_zero_unresolved_deps_is_ready() {
        let item = SpawnQueueItem::new(
            "req",
            "coder",
            0,
            SpawnPayload { task: "t".into(), context: serde_json::Value::Null, checkpoint: None },
            Priority::Normal,
            HashSet::new(),
            0,
        );
        assert!(item.is_ready());
    }

    #[test]
    fn item_blocked_by_one_dependency_is_not_ready() {
        let dep = Uuid::new_v4();
        let mut deps = HashSet::new();
        deps.insert(dep);
        let item = SpawnQueueItem::new(
            "req",
            "coder",
            0,
            SpawnPayload { task: "t".into(), context: serde_json::Value::Null, checkpoint: None },
            Priority::Normal,
            deps,
            1,
        );
        assert!(!item.is_ready());
    }
}

//! Checkpoint domain model — session-handoff snapshots for worker continuity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl CheckpointStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Expired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown checkpoint status: {other}")),
        }
    }
}

/// A snapshot of a worker's session state, used to hand off context either
/// to a fresh process restart or to a downstream spawn request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub swarm_id: Option<Uuid>,
    pub label: String,
    pub state: serde_json::Value,
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(
        worker_id: Uuid,
        swarm_id: Option<Uuid>,
        label: impl Into<String>,
        state: serde_json::Value,
        ttl_ms: Option<i64>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            worker_id,
            swarm_id,
            label: label.into(),
            state,
            status: CheckpointStatus::Pending,
            created_at,
            expires_at: ttl_ms.map(|ms| created_at + chrono::Duration::milliseconds(ms)),
            resolved_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_without_ttl_never_expires() {
        let cp = Checkpoint::new(Uuid::new_v4(), None, "pre-restart", serde_json::json!({}), None);
        assert!(!cp.is_expired(Utc::now() + chrono::Duration::days(365)));
    }

    #[test]
    fn checkpoint_with_ttl_expires() {
        let cp = Checkpoint::new(Uuid::new_v4(), None, "handoff", serde_json::json!({}), Some(1000));
        assert!(!cp.is_expired(cp.created_at));
        assert!(cp.is_expired(cp.created_at + chrono::Duration::milliseconds(1001)));
    }
}

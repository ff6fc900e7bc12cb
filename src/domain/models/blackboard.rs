//! BlackboardMessage domain model — per-swarm append-only message log.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::spawn_queue::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Status,
    Directive,
    Checkpoint,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Status => "status",
            Self::Directive => "directive",
            Self::Checkpoint => "checkpoint",
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            "status" => Ok(Self::Status),
            "directive" => Ok(Self::Directive),
            "checkpoint" => Ok(Self::Checkpoint),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// A single posted blackboard message. `read_by` is the read-set: handles
/// that have marked this message read via `markRead`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackboardMessage {
    pub id: Uuid,
    pub swarm_id: Uuid,
    pub sender_handle: String,
    pub message_type: MessageType,
    /// `None` means broadcast to the whole swarm; `Some(h)` is unicast to `h`.
    pub target_handle: Option<String>,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub read_by: HashSet<String>,
}

impl BlackboardMessage {
    pub fn new(
        swarm_id: Uuid,
        sender_handle: impl Into<String>,
        message_type: MessageType,
        target_handle: Option<String>,
        priority: Priority,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            swarm_id,
            sender_handle: sender_handle.into(),
            message_type,
            target_handle,
            priority,
            payload,
            created_at: Utc::now(),
            archived_at: None,
            read_by: HashSet::new(),
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_read_by(&self, handle: &str) -> bool {
        self.read_by.contains(handle)
    }
}

/// Filter options for `readMessages`.
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    pub message_type: Option<MessageType>,
    pub priority: Option<Priority>,
    pub unread_only: bool,
    pub reader_handle: Option<String>,
    pub include_archived: bool,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_is_unread_and_unarchived() {
        let msg = BlackboardMessage::new(
            Uuid::new_v4(),
            "coder-1",
            MessageType::Status,
            None,
            Priority::Normal,
            serde_json::json!({"ok": true}),
        );
        assert!(!msg.is_archived());
        assert!(!msg.is_read_by("coder-1"));
    }
}

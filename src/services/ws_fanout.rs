//! WS Fanout: the single `/ws` dashboard endpoint's broadcast policy,
//! decoupled from the transport so it can be driven from an axum handler.
//!
//! Every connection receives `worker.*` / `swarm.*` / `workflow.*` /
//! `trigger.fired` events unconditionally. `blackboard.*` events are
//! delivered only to connections that have subscribed to that chat
//! (spec §4.7: "message.* / blackboard.* delivered only to subscribed
//! connections"). Wire contract per spec.md:221.

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::services::event_bus::{CoordinationEvent, EventTag};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { token: String },
    Subscribe {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
    },
    Unsubscribe {
        #[serde(rename = "chatId")]
        chat_id: Uuid,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Authenticated,
    Error { message: String },
    Event { tag: EventTag, payload: serde_json::Value },
    Ping,
    Pong,
}

/// Per-connection state, owned by the axum handler task. Not `Clone`: one
/// instance lives exactly as long as its socket.
#[derive(Debug, Default)]
pub struct ConnectionState {
    pub authenticated: bool,
    pub subscribed_chats: std::collections::HashSet<Uuid>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: &ClientMessage, expected_token: &str) -> Option<ServerMessage> {
        match message {
            ClientMessage::Auth { token } => {
                if token == expected_token {
                    self.authenticated = true;
                    Some(ServerMessage::Authenticated)
                } else {
                    Some(ServerMessage::Error { message: "invalid token".to_string() })
                }
            }
            ClientMessage::Subscribe { chat_id } => {
                self.subscribed_chats.insert(*chat_id);
                None
            }
            ClientMessage::Unsubscribe { chat_id } => {
                self.subscribed_chats.remove(chat_id);
                None
            }
            ClientMessage::Ping => Some(ServerMessage::Pong),
        }
    }

    /// Whether `event` should be forwarded to this connection. Unauthenticated
    /// connections receive nothing at all.
    pub fn should_forward(&self, event: &CoordinationEvent) -> bool {
        if !self.authenticated {
            return false;
        }
        match event.tag {
            EventTag::BlackboardPosted | EventTag::BlackboardArchived => {
                event.payload.get("swarm_id").and_then(serde_json::Value::as_str).and_then(|s| Uuid::parse_str(s).ok()).is_some_and(|id| self.subscribed_chats.contains(&id))
            }
            _ => true,
        }
    }
}

pub fn to_server_message(event: &CoordinationEvent) -> ServerMessage {
    ServerMessage::Event { tag: event.tag, payload: event.payload.clone() }
}

pub fn ping_message() -> serde_json::Value {
    json!(ServerMessage::Ping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::services::event_bus::SequenceNumber;

    fn event(tag: EventTag, payload: serde_json::Value) -> CoordinationEvent {
        CoordinationEvent { id: Uuid::new_v4(), sequence: SequenceNumber(0), timestamp: Utc::now(), tag, payload }
    }

    #[test]
    fn unauthenticated_connection_forwards_nothing() {
        let state = ConnectionState::new();
        assert!(!state.should_forward(&event(EventTag::WorkerSpawned, json!({}))));
    }

    #[test]
    fn worker_events_forward_to_every_authenticated_connection() {
        let mut state = ConnectionState::new();
        state.apply(&ClientMessage::Auth { token: "secret".to_string() }, "secret");
        assert!(state.should_forward(&event(EventTag::WorkerSpawned, json!({}))));
    }

    #[test]
    fn blackboard_events_require_subscription() {
        let mut state = ConnectionState::new();
        state.apply(&ClientMessage::Auth { token: "secret".to_string() }, "secret");
        let chat_id = Uuid::new_v4();
        let evt = event(EventTag::BlackboardPosted, json!({ "swarm_id": chat_id }));
        assert!(!state.should_forward(&evt));

        state.apply(&ClientMessage::Subscribe { chat_id }, "secret");
        assert!(state.should_forward(&evt));

        state.apply(&ClientMessage::Unsubscribe { chat_id }, "secret");
        assert!(!state.should_forward(&evt));
    }

    #[test]
    fn wrong_token_rejects_auth() {
        let mut state = ConnectionState::new();
        let reply = state.apply(&ClientMessage::Auth { token: "wrong".to_string() }, "secret");
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
        assert!(!state.authenticated);
    }

    #[test]
    fn client_ping_replies_with_pong() {
        let mut state = ConnectionState::new();
        let reply = state.apply(&ClientMessage::Ping, "secret");
        assert!(matches!(reply, Some(ServerMessage::Pong)));
    }
}

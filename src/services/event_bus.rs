//! Process-local typed pub/sub. Every mutation in the core components
//! publishes here; WS Fanout and the Trigger Dispatcher are the two
//! in-process subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Monotonic per-process sequence number stamped onto every published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

/// The fixed tag vocabulary the core emits (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    WorkerSpawned,
    WorkerDismissed,
    WorkerStateChanged,
    WorkerOutput,
    WorkerRestarted,
    SwarmCreated,
    SwarmKilled,
    BlackboardPosted,
    BlackboardArchived,
    SpawnEnqueued,
    SpawnApproved,
    SpawnRejected,
    SpawnFulfilled,
    WorkflowStarted,
    WorkflowStepReady,
    WorkflowStepStarted,
    WorkflowStepCompleted,
    WorkflowStepFailed,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowPaused,
    WorkflowResumed,
    WorkflowCancelled,
    WorkflowDeadlock,
    TriggerFired,
}

/// Envelope wrapping every event with bus-assigned metadata. `payload` is an
/// opaque JSON value: components publish whatever shape their event implies
/// and subscribers (WS fanout, trigger dispatcher) interpret it by `tag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationEvent {
    pub id: Uuid,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub tag: EventTag,
    pub payload: serde_json::Value,
}

/// A subscriber-visible item: either a delivered event, or a marker
/// indicating `n` events were dropped because this subscriber fell behind
/// (spec §4.1: "slowest subscriber's oldest events are dropped").
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(CoordinationEvent),
    Lagged(u64),
}

pub struct Subscription {
    rx: broadcast::Receiver<CoordinationEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Delivery> {
        match self.rx.recv().await {
            Ok(event) => Some(Delivery::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(Delivery::Lagged(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

/// In-process pub/sub with a bounded per-subscriber queue. Publishers never
/// block: `tokio::sync::broadcast::Sender::send` is synchronous and a slow
/// subscriber only loses its own backlog, never stalls the publisher.
pub struct EventBus {
    sender: broadcast::Sender<CoordinationEvent>,
    sequence: AtomicU64,
}

/// Default bounded queue depth per subscriber (spec §4.1 design default).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

impl EventBus {
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self { sender, sequence: AtomicU64::new(0) }
    }

    pub fn publish(&self, tag: EventTag, payload: serde_json::Value) {
        let sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));
        let event = CoordinationEvent { id: Uuid::new_v4(), sequence, timestamp: Utc::now(), tag, payload };
        // A publish with no subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription { rx: self.sender.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(EventTag::SwarmCreated, serde_json::json!({"id": "x"}));
    }

    #[tokio::test]
    async fn subscriber_receives_published_event_in_order() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();
        bus.publish(EventTag::WorkerSpawned, serde_json::json!({"n": 1}));
        bus.publish(EventTag::WorkerSpawned, serde_json::json!({"n": 2}));

        let Delivery::Event(first) = sub.recv().await.unwrap() else { panic!("expected event") };
        let Delivery::Event(second) = sub.recv().await.unwrap() else { panic!("expected event") };
        assert!(first.sequence < second.sequence);
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_marker_then_resumes() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(EventTag::WorkerOutput, serde_json::json!({"n": i}));
        }

        match sub.recv().await.unwrap() {
            Delivery::Lagged(n) => assert!(n > 0),
            Delivery::Event(_) => panic!("expected a lagged marker for an overflowed subscriber"),
        }
    }
}

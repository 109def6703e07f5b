//! Progress events over a broadcast channel.
//!
//! Publishing never blocks and never fails: with no subscribers the event is
//! dropped, and a subscriber that falls behind skips what it missed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Started,
    BranchSettled,
    Complete,
    Partial,
    Failed,
    Dispatched,
    Status,
}

/// `{type, requestId, status, payload?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub request_id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ProgressEvent {
    pub fn new(event_type: EventType, request_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            event_type,
            request_id: Some(request_id.into()),
            status: status.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Fire and forget. Returns how many subscribers received the event.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

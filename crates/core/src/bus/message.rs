//! # Bus Messages
//!
//! The message envelope routed between workers and the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of bus message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Task dispatch from the coordinator to a worker
    Coordination,
    /// Completion/failure report from a worker
    Status,
    /// Error notification
    Error,
    /// Free-form data passed between agents
    Data,
    /// Request expecting a response
    Request,
    /// Response to a request
    Response,
}

/// A message in a worker's mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,
    /// Kind of message
    pub kind: MessageKind,
    /// Name of the sending worker
    pub sender: String,
    /// Name of the receiving worker
    pub recipient: String,
    /// Payload (JSON)
    #[serde(default)]
    pub body: serde_json::Value,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Priority hint; carried but does not reorder delivery
    #[serde(default)]
    pub priority: i32,
}

impl Message {
    /// Create a new message with a fresh ID
    pub fn new(kind: MessageKind, sender: &str, recipient: &str, body: serde_json::Value) -> Self {
        Self {
            id: fresh_id(),
            kind,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            body,
            timestamp: Utc::now(),
            priority: 0,
        }
    }

    /// Set the priority hint
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Generate a simple unique ID (timestamp + random suffix)
pub fn fresh_id() -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("{:x}-{:x}", nanos, rand_u32())
}

/// Simple random number (not cryptographic)
fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new(
            MessageKind::Coordination,
            "coordinator",
            "planner",
            serde_json::json!({"task_id": "wf_stage_0"}),
        );

        assert_eq!(msg.sender, "coordinator");
        assert_eq!(msg.recipient, "planner");
        assert_eq!(msg.priority, 0);
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_fresh_ids_are_distinct() {
        let a = fresh_id();
        let b = fresh_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&MessageKind::Coordination).unwrap();
        assert_eq!(json, "\"coordination\"");
    }
}

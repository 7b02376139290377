/*!
# Message Module

This module defines the task message, the unit of work that travels
through MuxQ queues.

Messages are immutable once enqueued. Each message carries:
- A unique identifier, assigned once at creation
- An open-schema JSON object payload (schema-on-read)
- Creation and expiry timestamps in unix seconds
- A weight used by the recovery policy to gate reinsertion
- A retry budget counting the reinsertion attempts left

The wire format is a single JSON object whose field names are part of
the protocol: `uuid`, `msg`, `create_time`, `dead_time`, `weight` and
`retry`. Producers and consumers on any stack interoperate as long as
they agree on those names.
*/

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{MuxqError, Result};

/// Default message lifetime in seconds, applied by [`TaskMessage::new`]
pub const DEFAULT_TTL_SECS: i64 = 6000;

/// Message payload: an open JSON object interpreted by consumers
pub type Payload = Map<String, Value>;

/// A unit of work travelling through the queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Unique message identity, never reused across retries
    #[serde(rename = "uuid")]
    pub id: String,

    /// Open-schema payload handed to the consumer
    #[serde(rename = "msg")]
    pub payload: Payload,

    /// Creation time in unix seconds
    #[serde(rename = "create_time")]
    pub created_at: i64,

    /// Expiry time in unix seconds; zero or negative means never expires
    #[serde(rename = "dead_time")]
    pub dead_at: i64,

    /// Importance of the message, consulted when processing fails
    pub weight: i32,

    /// Remaining reinsertion attempts
    pub retry: u32,
}

impl TaskMessage {
    /// Create a message with a fresh identity and the default lifetime
    pub fn new(payload: Payload, weight: i32, retry: u32) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            created_at: now,
            dead_at: now + DEFAULT_TTL_SECS,
            weight,
            retry,
        }
    }

    /// Replace the expiry with `created_at + secs`
    pub fn with_ttl(mut self, secs: i64) -> Self {
        self.dead_at = self.created_at + secs;
        self
    }

    /// Set an absolute expiry time in unix seconds
    pub fn with_deadline(mut self, dead_at: i64) -> Self {
        self.dead_at = dead_at;
        self
    }

    /// Clear the expiry so the message stays valid forever
    pub fn never_expires(mut self) -> Self {
        self.dead_at = 0;
        self
    }

    /// Check whether the message has outlived its expiry at `now`
    pub fn is_expired(&self, now: i64) -> bool {
        self.dead_at > 0 && now > self.dead_at
    }

    /// Encode the message into its JSON wire format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MuxqError::SerializationError(e.to_string()))
    }

    /// Decode a message from its JSON wire format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| MuxqError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(label: &str) -> Payload {
        json!({ "cmd": label, "attempt": 1 })
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn new_message_gets_identity_and_default_lifetime() {
        let message = TaskMessage::new(payload("create"), 2, 3);

        assert!(!message.id.is_empty());
        assert_eq!(message.dead_at, message.created_at + DEFAULT_TTL_SECS);
        assert_eq!(message.weight, 2);
        assert_eq!(message.retry, 3);
    }

    #[test]
    fn identities_are_unique() {
        let a = TaskMessage::new(payload("a"), 0, 0);
        let b = TaskMessage::new(payload("b"), 0, 0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn wire_format_uses_protocol_field_names() {
        let message = TaskMessage::new(payload("rename"), 1, 2);
        let bytes = message.to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let object = value.as_object().unwrap();
        for field in ["uuid", "msg", "create_time", "dead_time", "weight", "retry"] {
            assert!(object.contains_key(field), "missing wire field {field}");
        }
        assert_eq!(object["msg"]["cmd"], "rename");
    }

    #[test]
    fn wire_round_trip_preserves_the_message() {
        let message = TaskMessage::new(payload("round"), -1, 5).with_ttl(60);
        let decoded = TaskMessage::from_bytes(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn garbage_bytes_fail_decoding() {
        let err = TaskMessage::from_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, MuxqError::SerializationError(_)));
    }

    #[test]
    fn expiry_is_strictly_after_dead_time() {
        let message = TaskMessage::new(payload("expiry"), 0, 0).with_deadline(100);

        assert!(!message.is_expired(99));
        assert!(!message.is_expired(100));
        assert!(message.is_expired(101));
    }

    #[test]
    fn non_positive_dead_time_never_expires() {
        let message = TaskMessage::new(payload("forever"), 0, 0).never_expires();
        assert!(!message.is_expired(i64::MAX));

        let message = message.with_deadline(-42);
        assert!(!message.is_expired(i64::MAX));
    }
}

//! Kafka message types.
//!
//! These are produced by the broker transport in the kafka-source crate and
//! consumed by the dispatcher. They carry no rdkafka types so that the
//! dispatch path can be exercised without a broker.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A raw message as delivered by the broker.
///
/// One value is handed to exactly one dispatch call; it is never shared
/// between concurrent dispatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: i32,
    /// Kafka offset within the partition
    pub offset: i64,
    /// Message body, untouched
    pub payload: Vec<u8>,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// When the consumer received the message
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            payload,
            key: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Message body after a best-effort decode.
///
/// Serializes untagged: a structured value stays a JSON tree, a raw body
/// becomes a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedPayload {
    /// Body parsed as JSON
    Structured(serde_json::Value),
    /// Body that did not parse, kept as text
    Raw(String),
}

impl DecodedPayload {
    pub fn is_structured(&self) -> bool {
        matches!(self, DecodedPayload::Structured(_))
    }
}

/// Result of dispatching one message.
///
/// The delivery loop advances the partition's offset for both variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_payload_serializes_as_tree() {
        let payload = DecodedPayload::Structured(json!({"op": "insert", "id": 7}));
        let rendered = serde_json::to_string(&payload).unwrap();
        assert_eq!(rendered, r#"{"op":"insert","id":7}"#);
    }

    #[test]
    fn test_raw_payload_serializes_as_string() {
        let payload = DecodedPayload::Raw("not-json".to_string());
        let rendered = serde_json::to_string(&payload).unwrap();
        assert_eq!(rendered, r#""not-json""#);
    }

    #[test]
    fn test_inbound_message_builder() {
        let message = InboundMessage::new("tidb_cdc", 2, 41, b"{}".to_vec()).with_key("row-1");
        assert_eq!(message.topic, "tidb_cdc");
        assert_eq!(message.partition, 2);
        assert_eq!(message.offset, 41);
        assert_eq!(message.key.as_deref(), Some(&b"row-1"[..]));
    }
}

//! Structured log record emitted once per consumed change event.
//!
//! Wire shape, one object per line:
//!
//! ```text
//! {"timestamp":"2024-05-01T12:00:00.123Z","action":"db_change","topic":"tidb_cdc","payload":{...}}
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::decode::decode;
use crate::message::{DecodedPayload, InboundMessage};

/// Action tag carried by every change-event record.
pub const DB_CHANGE_ACTION: &str = "db_change";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub action: &'static str,
    pub topic: String,
    pub payload: DecodedPayload,
}

impl LogRecord {
    /// Build a `db_change` record for a message, stamped with the current time.
    pub fn db_change(message: &InboundMessage) -> Self {
        Self::db_change_at(message, Utc::now())
    }

    pub fn db_change_at(message: &InboundMessage, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            action: DB_CHANGE_ACTION,
            topic: message.topic.clone(),
            payload: decode(&message.payload),
        }
    }

    /// Render the record as a single JSON line, newline included.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

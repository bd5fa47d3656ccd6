//! Test data publishing helpers for Kafka integration tests
//!
//! This module builds change events shaped like the ones a TiDB changefeed
//! writes, and publishes them to Kafka topics.

use crate::KafkaTestProducer;
use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};

/// Bodies of the three-message scenario: JSON, non-JSON, JSON.
pub const SCENARIO_BODIES: [&[u8]; 3] = [br#"{"op":"insert"}"#, b"not-json", br#"{"op":"delete"}"#];

const TABLES: [&str; 3] = ["users", "orders", "payments"];
const OPS: [&str; 4] = ["insert", "update", "update", "delete"];

/// Build one change event for `table`.
pub fn change_event(op: &str, table: &str, id: u64, data: Value) -> Value {
    json!({
        "op": op,
        "database": "app",
        "table": table,
        "pk": { "id": id },
        "data": data,
        "commit_ts": Utc::now().timestamp_millis(),
    })
}

/// Deterministic sample events cycling through tables and operations.
pub fn sample_change_events(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let table = TABLES[i % TABLES.len()];
            let op = OPS[i % OPS.len()];
            let id = (i / TABLES.len()) as u64 + 1;
            let data = match op {
                "delete" => Value::Null,
                _ => json!({ "id": id, "version": i, "status": format!("{table}-{op}") }),
            };
            change_event(op, table, id, data)
        })
        .collect()
}

/// Publish the three scenario bodies to a single partition, in order.
pub async fn publish_scenario_bodies(producer: &KafkaTestProducer, topic: &str) -> Result<()> {
    // Same key, so all three land on one partition.
    for body in SCENARIO_BODIES {
        producer.publish_raw(topic, Some("scenario"), body).await?;
    }
    tracing::info!("Published {} scenario messages to '{topic}'", SCENARIO_BODIES.len());
    Ok(())
}

/// Publish `count` sample change events, keyed by table and primary key.
pub async fn publish_sample_change_events(
    producer: &KafkaTestProducer,
    topic: &str,
    count: usize,
) -> Result<usize> {
    let mut published = 0;
    for event in sample_change_events(count) {
        let key = format!("{}:{}", event["table"].as_str().unwrap_or_default(), event["pk"]["id"]);
        producer.publish_json(topic, Some(&key), &event).await?;
        published += 1;
    }
    tracing::info!("Published {published} change events to '{topic}'");
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_bodies() {
        assert!(serde_json::from_slice::<Value>(SCENARIO_BODIES[0]).is_ok());
        assert!(serde_json::from_slice::<Value>(SCENARIO_BODIES[1]).is_err());
        assert!(serde_json::from_slice::<Value>(SCENARIO_BODIES[2]).is_ok());
    }

    #[test]
    fn test_sample_change_events() {
        let events = sample_change_events(8);
        assert_eq!(events.len(), 8);
        assert_eq!(events[0]["op"], "insert");
        assert_eq!(events[0]["table"], "users");
        assert_eq!(events[1]["table"], "orders");
        assert_eq!(events[3]["op"], "delete");
        assert!(events[3]["data"].is_null());
        assert_eq!(events[3]["pk"]["id"], 2);
    }

    #[test]
    fn test_change_event_field_order() {
        let event = change_event("update", "users", 7, json!({ "id": 7 }));
        let keys: Vec<&str> = event.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["op", "database", "table", "pk", "data", "commit_ts"]);
    }
}

//! Kafka log sync E2E test
//!
//! Test flow:
//! 1. Create a single-partition topic
//! 2. Publish the three scenario bodies (JSON, non-JSON, JSON)
//! 3. Run the log consumer into a temporary file until all records arrive
//! 4. Verify order, payloads and that a second run resumes after the committed offsets

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use cdc_log_consumer::kafka::{
    run_log_sync, Config, DeliverySummary, StartOffset, StopHandle, WriterSink,
};
use cdc_log_kafka_producer::{publish_scenario_bodies, KafkaTestProducer};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Kafka broker address for testing
const KAFKA_BROKER: &str = "kafka:9092";

fn test_id() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

fn config(topic: &str, group_id: &str, start_offset: StartOffset) -> Config {
    Config {
        brokers: vec![KAFKA_BROKER.to_string()],
        client_id: "cdc-log-consumer-test".to_string(),
        group_id: group_id.to_string(),
        topic: topic.to_string(),
        start_offset,
        session_timeout_ms: "6000".to_string(),
        concurrency: 1,
    }
}

async fn spawn_consumer(
    config: Config,
    output: &Path,
    stop: StopHandle,
) -> Result<JoinHandle<cdc_log_consumer::kafka::Result<DeliverySummary>>, Box<dyn std::error::Error>>
{
    let sink = Arc::new(WriterSink::append_file(output).await?);
    Ok(tokio::spawn(run_log_sync(
        config,
        sink,
        stop,
        Duration::from_secs(10),
    )))
}

async fn wait_for_records(path: &Path, count: usize, timeout: Duration) -> Vec<Value> {
    let deadline = Instant::now() + timeout;
    loop {
        let content = tokio::fs::read_to_string(path).await.unwrap_or_default();
        let records: Vec<Value> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if records.len() >= count || Instant::now() >= deadline {
            return records;
        }
        sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::test]
#[ignore = "requires a Kafka broker at kafka:9092"]
async fn test_kafka_log_sync_lib() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter("cdc_log_consumer=debug,cdc_log_kafka_source=debug")
        .try_init()
        .ok();

    let test_id = test_id();
    let topic = format!("test-cdc-{test_id}");
    let group_id = format!("test-group-{test_id}");

    // Step 1: Setup Kafka producer and topic
    let producer = KafkaTestProducer::new(KAFKA_BROKER).await?;
    producer.create_topic_if_not_exists(&topic, 1).await?;

    // Give Kafka a moment to propagate topic metadata
    sleep(Duration::from_millis(500)).await;

    // Step 2: Publish the scenario bodies
    publish_scenario_bodies(&producer, &topic).await?;

    // Step 3: Consume from the beginning
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("records.jsonl");
    let stop = StopHandle::new();
    let handle = spawn_consumer(
        config(&topic, &group_id, StartOffset::FromEarliest),
        &output,
        stop.clone(),
    )
    .await?;

    let records = wait_for_records(&output, 3, Duration::from_secs(60)).await;
    stop.stop();
    let summary = handle.await??;

    // Step 4: Verify the records
    assert_eq!(records.len(), 3, "records: {records:?}");
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.failed, 0);
    for record in &records {
        assert_eq!(record["action"], "db_change");
        assert_eq!(record["topic"], topic.as_str());
        assert!(record["timestamp"].as_str().is_some_and(|t| t.ends_with('Z')));
    }
    assert_eq!(records[0]["payload"]["op"], "insert");
    assert_eq!(records[1]["payload"], "not-json");
    assert_eq!(records[2]["payload"]["op"], "delete");

    // A second member of the same group resumes after the committed offsets
    producer
        .publish_raw(&topic, Some("scenario"), br#"{"op":"update"}"#)
        .await?;
    let resumed_output = dir.path().join("resumed.jsonl");
    let stop = StopHandle::new();
    let handle = spawn_consumer(
        config(&topic, &group_id, StartOffset::FromEarliest),
        &resumed_output,
        stop.clone(),
    )
    .await?;

    let resumed = wait_for_records(&resumed_output, 1, Duration::from_secs(60)).await;
    // Leave time for an unexpected redelivery to show up
    sleep(Duration::from_secs(2)).await;
    stop.stop();
    handle.await??;

    let resumed_all = wait_for_records(&resumed_output, 1, Duration::ZERO).await;
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed_all.len(), 1, "records: {resumed_all:?}");
    assert_eq!(resumed_all[0]["payload"]["op"], "update");

    Ok(())
}

#[tokio::test]
#[ignore = "requires a Kafka broker at kafka:9092"]
async fn test_kafka_missing_topic_fails_subscribe() -> Result<(), Box<dyn std::error::Error>> {
    let test_id = test_id();
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("records.jsonl");

    let handle = spawn_consumer(
        config(
            &format!("test-missing-{test_id}"),
            &format!("test-group-{test_id}"),
            StartOffset::FromEarliest,
        ),
        &output,
        StopHandle::new(),
    )
    .await?;

    let err = handle.await?.unwrap_err();
    assert!(
        matches!(err, cdc_log_consumer::kafka::Error::Subscription(_)),
        "unexpected error: {err}"
    );
    Ok(())
}

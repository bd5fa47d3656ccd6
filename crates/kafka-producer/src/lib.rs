//! Kafka producer library for testing cdc-log-consumer
//!
//! This library publishes CDC change events, or arbitrary raw bodies, to Kafka
//! topics so the consumer can be exercised against a real broker.
//!
//! ## Features
//!
//! - **Raw publishing**: Bodies are sent byte for byte, including non-JSON ones
//! - **Change events**: Helpers that build TiDB-style change events as JSON
//! - **Topic management**: Utilities for creating Kafka topics
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cdc_log_kafka_producer::KafkaTestProducer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let producer = KafkaTestProducer::new("localhost:9092").await?;
//!
//!     producer.create_topic_if_not_exists("tidb_cdc", 3).await?;
//!     producer
//!         .publish_raw("tidb_cdc", Some("users:1"), br#"{"op":"insert"}"#)
//!         .await?;
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;

// Test data helpers module
pub mod testdata;

pub use testdata::{
    change_event, publish_sample_change_events, publish_scenario_bodies, SCENARIO_BODIES,
};

/// Kafka producer wrapper for testing
pub struct KafkaTestProducer {
    producer: FutureProducer,
    broker: String,
}

impl KafkaTestProducer {
    /// Create a new Kafka test producer
    pub async fn new(broker: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", broker)
            .set("message.timeout.ms", "5000")
            .create()
            .context("Failed to create Kafka producer")?;

        Ok(Self {
            producer,
            broker: broker.to_string(),
        })
    }

    /// Create Kafka topic if it doesn't exist
    pub async fn create_topic_if_not_exists(&self, topic: &str, partitions: i32) -> Result<()> {
        let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.broker)
            .create()
            .context("Failed to create admin client")?;

        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(1));
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));

        let results = admin_client
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create topics: {e}"))?;
        for result in results {
            match result {
                Ok(topic_name) => {
                    tracing::info!("Topic '{topic_name}' created successfully");
                }
                Err((topic_name, err)) => {
                    if err.to_string().contains("already exists") {
                        tracing::info!("Topic '{topic_name}' already exists");
                    } else {
                        return Err(anyhow::anyhow!("Failed to create topic: {err}"));
                    }
                }
            }
        }

        Ok(())
    }

    /// Publish a body exactly as given
    pub async fn publish_raw(
        &self,
        topic: &str,
        key: Option<&str>,
        body: &[u8],
    ) -> Result<()> {
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(body);
        if let Some(key) = key {
            record = record.key(key);
        }

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(err, _)| err)
            .context("Failed to send message to Kafka")?;

        tracing::debug!("Published {} bytes to {topic}", body.len());
        Ok(())
    }

    /// Publish a JSON value as a compact body
    pub async fn publish_json(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &serde_json::Value,
    ) -> Result<()> {
        let body = serde_json::to_vec(value).context("Failed to encode JSON message")?;
        self.publish_raw(topic, key, &body).await
    }
}

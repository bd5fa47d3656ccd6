//! Consume a CDC topic and write every change event as one JSON log line.
//!
//! Offsets are committed after each message has been handed to the sink,
//! so a crash replays at most the in-flight messages (at-least-once).

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::future::BoxFuture;
use futures::FutureExt;
use kafka_types::{DispatchOutcome, InboundMessage};
use tracing::info;

use crate::client::ConsumerGroupClient;
use crate::consumer::{
    BrokerEndpoint, ConsumerConfig, ConsumerGroupIdentity, StartOffset, Subscription,
};
use crate::delivery::{DeliverySummary, StopHandle};
use crate::dispatcher::MessageDispatcher;
use crate::error::{Error, Result};
use crate::sink::LogSink;

/// Configuration for the Kafka log consumer.
#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[arg(
        long,
        env = "KAFKA_BROKER",
        value_delimiter = ',',
        default_value = "kafka:9092"
    )]
    pub brokers: Vec<String>,
    /// Client id reported to the brokers
    #[arg(long, env = "KAFKA_CLIENT_ID", default_value = "sre-consumer")]
    pub client_id: String,
    /// Consumer group ID
    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "sre-consumer-group")]
    pub group_id: String,
    /// Topic to consume from
    #[arg(long, env = "KAFKA_TOPIC", default_value = "tidb_cdc")]
    pub topic: String,
    /// Where to start on partitions without a committed offset
    #[arg(
        long,
        env = "CDC_START_OFFSET",
        value_enum,
        default_value_t = StartOffset::FromEarliest
    )]
    pub start_offset: StartOffset,
    /// Session timeout in milliseconds
    #[arg(long, default_value = "30000")]
    pub session_timeout_ms: String,
    /// Maximum number of partitions processed concurrently.
    /// Messages of one partition are always processed one at a time, in offset order.
    #[arg(long, env = "CDC_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,
}

impl Config {
    /// Validate the flags and build the consumer configuration.
    pub fn consumer_config(&self, metadata_timeout: Duration) -> Result<ConsumerConfig> {
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(Error::InvalidConfig("topic must not be empty".to_string()));
        }
        if self.group_id.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "group id must not be empty".to_string(),
            ));
        }
        if self.session_timeout_ms.parse::<u64>().is_err() {
            return Err(Error::InvalidConfig(format!(
                "session timeout must be a number of milliseconds, got '{}'",
                self.session_timeout_ms
            )));
        }

        let endpoint = BrokerEndpoint::new(self.brokers.iter().cloned())?;
        let identity = ConsumerGroupIdentity {
            client_id: self.client_id.clone(),
            group_id: self.group_id.clone(),
        };
        Ok(ConsumerConfig {
            session_timeout_ms: self.session_timeout_ms.clone(),
            metadata_timeout,
            concurrency: self.concurrency,
            ..ConsumerConfig::new(endpoint, identity)
        })
    }

    pub fn subscription(&self) -> Subscription {
        Subscription {
            topic: self.topic.clone(),
            start_offset: self.start_offset,
        }
    }
}

/// Message handler that dispatches into `dispatcher`.
pub fn log_handler<S>(
    dispatcher: Arc<MessageDispatcher<S>>,
) -> impl Fn(InboundMessage) -> BoxFuture<'static, DispatchOutcome>
where
    S: LogSink + ?Sized + 'static,
{
    move |message| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.dispatch(message).await }.boxed()
    }
}

/// Run the log consumer until `stop` is triggered.
///
/// Connection, subscription and fatal transport errors are returned; per-message
/// sink failures are logged and do not stop the consumer.
pub async fn run_log_sync<S>(
    config: Config,
    sink: Arc<S>,
    stop: StopHandle,
    connect_timeout: Duration,
) -> Result<DeliverySummary>
where
    S: LogSink + ?Sized + 'static,
{
    let consumer_config = config.consumer_config(connect_timeout)?;
    info!(
        "Starting Kafka log sync from topic {} (group {}, concurrency {})",
        config.topic, config.group_id, config.concurrency
    );

    let mut client = ConsumerGroupClient::new(consumer_config, stop);
    client.connect().await?;
    client.subscribe(config.subscription()).await?;

    let dispatcher = Arc::new(MessageDispatcher::new(sink));
    let summary = client.run(log_handler(Arc::clone(&dispatcher))).await?;

    let stats = dispatcher.stats();
    info!(
        "Kafka log sync completed: delivered {} records, {} failed, from topic {}",
        stats.delivered, stats.failed, config.topic
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::TopicPartition;
    use crate::delivery::DeliveryLoop;
    use crate::sink::WriterSink;
    use crate::testing::ScriptedTransport;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["cdc-log-consumer"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_explicit_flags() {
        let config = parse(&[
            "--brokers",
            "k1:9092,k2:9092",
            "--client-id",
            "c",
            "--group-id",
            "g",
            "--topic",
            "orders",
            "--start-offset",
            "from-committed",
            "--concurrency",
            "4",
        ]);
        assert_eq!(config.brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(config.start_offset, StartOffset::FromCommitted);

        let consumer = config.consumer_config(Duration::from_secs(3)).unwrap();
        assert_eq!(consumer.endpoint.bootstrap_servers(), "k1:9092,k2:9092");
        assert_eq!(consumer.identity.group_id, "g");
        assert_eq!(consumer.concurrency, 4);
        assert_eq!(consumer.metadata_timeout, Duration::from_secs(3));
        assert_eq!(config.subscription().topic, "orders");
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = parse(&["--concurrency", "0"]);
        let err = config.consumer_config(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_empty_brokers() {
        let config = parse(&["--brokers", " "]);
        assert!(config.consumer_config(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_rejects_bad_session_timeout() {
        let config = parse(&["--session-timeout-ms", "soon"]);
        assert!(config.consumer_config(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_rejects_unknown_start_offset() {
        assert!(
            Config::try_parse_from(["cdc-log-consumer", "--start-offset", "from-latest"]).is_err()
        );
    }

    #[tokio::test]
    async fn test_change_events_become_log_lines() {
        let stop = StopHandle::new();
        let transport = ScriptedTransport::new()
            .assign("tidb_cdc", [0])
            .message("tidb_cdc", 0, 0, br#"{"op":"insert","id":1}"#)
            .message("tidb_cdc", 0, 1, br#"{"op":"update","id":1}"#)
            .message("tidb_cdc", 0, 2, b"not json")
            .stop_when_drained(stop.clone());
        let probe = transport.probe();

        let sink = Arc::new(WriterSink::new(Vec::new()));
        let dispatcher = Arc::new(MessageDispatcher::new(Arc::clone(&sink)));
        let summary = DeliveryLoop::new(transport, 1, stop)
            .run(log_handler(Arc::clone(&dispatcher)))
            .await
            .unwrap();

        assert_eq!(summary.dispatched, 3);
        assert_eq!(dispatcher.stats().delivered, 3);
        assert_eq!(probe.committed(&TopicPartition::new("tidb_cdc", 0)), Some(3));

        drop(dispatcher);
        let sink = Arc::try_unwrap(sink).ok().unwrap();
        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["payload"]["op"], "insert");
        assert_eq!(lines[1]["payload"]["op"], "update");
        assert_eq!(lines[2]["payload"], "not json");
        assert!(lines.iter().all(|l| l["action"] == "db_change"));
    }
}

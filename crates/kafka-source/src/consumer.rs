use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use clap::ValueEnum;
use kafka_types::InboundMessage;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer as RdkafkaConsumer, ConsumerContext, Rebalance,
    StreamConsumer as RdkafkaStreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage as RdkafkaBorrowedMessage, Message as RdkafkaMessage};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::assignment::TopicPartition;
use crate::error::{Error, Result};
use crate::transport::{RebalanceEvent, Transport, TransportEvent};

/// Where a partition without a committed offset starts.
///
/// A committed offset always wins; this only decides the fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StartOffset {
    /// Start at the earliest retained message
    #[default]
    #[value(name = "from-earliest")]
    FromEarliest,
    /// Resume at the committed offset, or at the end of the log if there is none
    #[value(name = "from-committed")]
    FromCommitted,
}

impl StartOffset {
    /// Value for librdkafka's `auto.offset.reset`.
    pub fn auto_offset_reset(&self) -> &'static str {
        match self {
            StartOffset::FromEarliest => "earliest",
            StartOffset::FromCommitted => "latest",
        }
    }
}

/// Ordered list of broker addresses (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    addresses: Vec<String>,
}

impl BrokerEndpoint {
    pub fn new<I, S>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addresses: Vec<String> = addresses
            .into_iter()
            .map(Into::into)
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if addresses.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one broker address is required".to_string(),
            ));
        }
        Ok(Self { addresses })
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Comma-separated form for `bootstrap.servers`.
    pub fn bootstrap_servers(&self) -> String {
        self.addresses.join(",")
    }
}

/// Who this process is within the consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroupIdentity {
    pub client_id: String,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub start_offset: StartOffset,
}

/// Configuration for Kafka consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub endpoint: BrokerEndpoint,
    pub identity: ConsumerGroupIdentity,
    /// Session timeout in milliseconds
    ///
    /// A member that does not heartbeat within this window is considered
    /// dead and its partitions are reassigned.
    pub session_timeout_ms: String,
    /// Upper bound for the metadata round trips made by connect and subscribe
    pub metadata_timeout: Duration,
    /// Maximum number of partitions dispatched concurrently
    pub concurrency: usize,
}

impl ConsumerConfig {
    pub fn new(endpoint: BrokerEndpoint, identity: ConsumerGroupIdentity) -> Self {
        Self {
            endpoint,
            identity,
            session_timeout_ms: "30000".to_string(),
            metadata_timeout: Duration::from_secs(10),
            concurrency: 1,
        }
    }

    /// Settings shared by the connection probe and the group consumer.
    pub(crate) fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.endpoint.bootstrap_servers())
            .set("client.id", &self.identity.client_id);
        config
    }

    /// Settings for the group consumer of a subscription.
    ///
    /// Auto commit is off: offsets are committed by the delivery loop after
    /// each dispatch.
    pub(crate) fn group_config(&self, subscription: &Subscription) -> ClientConfig {
        let mut config = self.client_config();
        config
            .set("group.id", &self.identity.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.offset.reset",
                subscription.start_offset.auto_offset_reset(),
            )
            .set("session.timeout.ms", &self.session_timeout_ms)
            .set("allow.auto.create.topics", "false")
            .set("enable.partition.eof", "false");
        config
    }
}

/// Forwards rebalance notifications from librdkafka to the delivery loop.
pub struct RebalanceContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let event = match rebalance {
            Rebalance::Revoke(tpl) => RebalanceEvent::Revoked(partitions_of(tpl)),
            Rebalance::Error(e) => RebalanceEvent::Failed(e.to_string()),
            Rebalance::Assign(_) => return,
        };
        let _ = self.events.send(event);
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            let _ = self
                .events
                .send(RebalanceEvent::Assigned(partitions_of(tpl)));
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!(
                "Offset commit failed for {}: {e}; messages may be redelivered",
                offsets.count()
            );
        }
    }
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

fn is_fatal(err: &KafkaError) -> bool {
    matches!(err, KafkaError::MessageConsumptionFatal(_))
        || err.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal)
}

/// Check that the cluster answers a metadata request.
///
/// Returns the number of brokers in the cluster. The request runs on the
/// blocking pool.
pub(crate) async fn probe_cluster(config: &ConsumerConfig) -> Result<usize> {
    let probe: BaseConsumer = config
        .client_config()
        .create()
        .map_err(|e| Error::Connection(format!("Failed to create client: {e}")))?;
    let timeout = config.metadata_timeout;

    let metadata = tokio::task::spawn_blocking(move || probe.fetch_metadata(None, timeout))
        .await?
        .map_err(|e| {
            Error::Connection(format!(
                "Brokers {} unreachable: {e}",
                config.endpoint.bootstrap_servers()
            ))
        })?;
    Ok(metadata.brokers().len())
}

/// rdkafka-backed transport for one subscribed topic.
pub struct KafkaTransport {
    consumer: Arc<RdkafkaStreamConsumer<RebalanceContext>>,
    events: mpsc::UnboundedReceiver<RebalanceEvent>,
    pending: Option<InboundMessage>,
    /// Last offset committed per owned partition, flushed synchronously on leave
    committed: BTreeMap<TopicPartition, i64>,
}

impl KafkaTransport {
    /// Create the group consumer and subscribe it to the topic.
    pub(crate) async fn subscribe(
        config: &ConsumerConfig,
        subscription: &Subscription,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer: RdkafkaStreamConsumer<RebalanceContext> = config
            .group_config(subscription)
            .create_with_context(RebalanceContext { events: tx })
            .map_err(|e| Error::Subscription(format!("Failed to create consumer: {e}")))?;
        let consumer = Arc::new(consumer);

        let metadata = {
            let consumer = Arc::clone(&consumer);
            let topic = subscription.topic.clone();
            let timeout = config.metadata_timeout;
            tokio::task::spawn_blocking(move || consumer.fetch_metadata(Some(&topic), timeout))
                .await?
                .map_err(|e| Error::Subscription(format!("Failed to fetch topic metadata: {e}")))?
        };
        let exists = metadata.topics().iter().any(|t| {
            t.name() == subscription.topic && t.error().is_none() && !t.partitions().is_empty()
        });
        if !exists {
            return Err(Error::Subscription(format!(
                "Topic '{}' does not exist",
                subscription.topic
            )));
        }

        consumer
            .subscribe(&[&subscription.topic])
            .map_err(|e| Error::Subscription(format!("Failed to subscribe to topic: {e}")))?;

        Ok(Self {
            consumer,
            events: rx,
            pending: None,
            committed: BTreeMap::new(),
        })
    }

    fn convert(msg: &RdkafkaBorrowedMessage<'_>) -> InboundMessage {
        InboundMessage {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
            key: msg.key().map(|k| k.to_vec()),
            received_at: Utc::now(),
        }
    }

    fn rebalance(&mut self, event: RebalanceEvent) -> TransportEvent {
        if let RebalanceEvent::Revoked(partitions) = &event {
            for tp in partitions {
                self.committed.remove(tp);
            }
        }
        TransportEvent::Rebalance(event)
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn next_event(&mut self) -> Result<TransportEvent> {
        if let Ok(event) = self.events.try_recv() {
            return Ok(self.rebalance(event));
        }
        if let Some(message) = self.pending.take() {
            return Ok(TransportEvent::Message(message));
        }

        loop {
            let received = tokio::select! {
                biased;
                Some(event) = self.events.recv() => return Ok(self.rebalance(event)),
                received = self.consumer.recv() => received.map(|msg| Self::convert(&msg)),
            };

            match received {
                Ok(message) => {
                    // A rebalance seen during this poll must reach the loop first.
                    if let Ok(event) = self.events.try_recv() {
                        self.pending = Some(message);
                        return Ok(self.rebalance(event));
                    }
                    return Ok(TransportEvent::Message(message));
                }
                Err(e) if is_fatal(&e) => {
                    return Err(Error::FatalTransport(e.to_string()));
                }
                Err(e) => {
                    warn!("Error receiving message: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn commit(&mut self, partition: &TopicPartition, next_offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &partition.topic,
            partition.partition,
            Offset::Offset(next_offset),
        )?;

        match self.consumer.commit(&tpl, CommitMode::Async) {
            Ok(()) => {
                debug!("Committed {partition} at {next_offset}");
                self.committed.insert(partition.clone(), next_offset);
                Ok(())
            }
            Err(e) if is_fatal(&e) => Err(Error::FatalTransport(e.to_string())),
            Err(e) => {
                warn!("Failed to commit {partition} at {next_offset}: {e}; messages may be redelivered");
                Ok(())
            }
        }
    }

    async fn leave(&mut self) -> Result<()> {
        // Async commits may still be queued; confirm the final offsets before leaving.
        if !self.committed.is_empty() {
            let mut tpl = TopicPartitionList::new();
            for (tp, next_offset) in &self.committed {
                tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*next_offset))?;
            }
            let consumer = Arc::clone(&self.consumer);
            let flushed =
                tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
                    .await?;
            if let Err(e) = flushed {
                warn!("Failed to flush final offsets: {e}; messages may be redelivered");
            }
        }

        self.consumer.unsubscribe();
        info!("Left consumer group");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConsumerConfig {
        ConsumerConfig::new(
            BrokerEndpoint::new(["kafka-1:9092", "kafka-2:9092"]).unwrap(),
            ConsumerGroupIdentity {
                client_id: "sre-consumer".to_string(),
                group_id: "sre-consumer-group".to_string(),
            },
        )
    }

    #[test]
    fn test_broker_endpoint_keeps_order() {
        let endpoint = BrokerEndpoint::new(["b:9092", " a:9092 ", ""]).unwrap();
        assert_eq!(endpoint.addresses(), &["b:9092", "a:9092"]);
        assert_eq!(endpoint.bootstrap_servers(), "b:9092,a:9092");
    }

    #[test]
    fn test_broker_endpoint_rejects_empty() {
        let err = BrokerEndpoint::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(BrokerEndpoint::new([" "]).is_err());
    }

    #[test]
    fn test_start_offset_mapping() {
        assert_eq!(StartOffset::FromEarliest.auto_offset_reset(), "earliest");
        assert_eq!(StartOffset::FromCommitted.auto_offset_reset(), "latest");
        assert_eq!(StartOffset::default(), StartOffset::FromEarliest);
    }

    #[test]
    fn test_group_config() {
        let subscription = Subscription {
            topic: "tidb_cdc".to_string(),
            start_offset: StartOffset::FromEarliest,
        };
        let client = config().group_config(&subscription);
        assert_eq!(
            client.get("bootstrap.servers"),
            Some("kafka-1:9092,kafka-2:9092")
        );
        assert_eq!(client.get("client.id"), Some("sre-consumer"));
        assert_eq!(client.get("group.id"), Some("sre-consumer-group"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client.get("session.timeout.ms"), Some("30000"));
    }

    #[test]
    fn test_probe_config_has_no_group() {
        let client = config().client_config();
        assert_eq!(client.get("group.id"), None);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(is_fatal(&KafkaError::MessageConsumptionFatal(
            RDKafkaErrorCode::Fatal
        )));
        assert!(!is_fatal(&KafkaError::MessageConsumption(
            RDKafkaErrorCode::BrokerTransportFailure
        )));
    }
}

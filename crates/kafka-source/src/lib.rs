//! Kafka consumer and log sync library for cdc-log-consumer.
//!
//! This crate provides:
//! - A consumer-group client for one CDC topic with explicit offset commits
//! - Per-message dispatch into a line-oriented JSON log sink
//!
//! # Features
//!
//! - At-least-once delivery: an offset is committed only after its message was dispatched
//! - Per-partition ordering, with optional concurrency across partitions
//! - Rebalance handling through an explicit partition ownership table
//! - Graceful stop: in-flight messages finish and are committed before leaving the group
//!
//! # Dependency Direction
//!
//! This crate depends on `kafka-types` for the message and record types
//! (InboundMessage, DecodedPayload, LogRecord, DispatchOutcome). Those types
//! do no I/O and are shared with the test producer.

pub mod assignment;

/// Consumer group lifecycle: connect, subscribe, run, stop
///
/// Wraps the rdkafka transport and drives it with the delivery loop.
pub mod client;

/// rdkafka transport and consumer configuration
///
/// Rebalance notifications are forwarded from the consumer context to the
/// delivery loop over a channel.
pub mod consumer;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod sink;
pub mod sync;
pub mod testing;
pub mod transport;

// Re-export from kafka-types for convenience
pub use kafka_types::{DecodedPayload, DispatchOutcome, InboundMessage, LogRecord};

// Re-export sync functions
pub use sync::{run_log_sync, Config};

// Re-export consumer types
pub use assignment::{AssignmentState, PartitionTable, TopicPartition};
pub use client::{ClientState, ConsumerGroupClient};
pub use consumer::{
    BrokerEndpoint, ConsumerConfig, ConsumerGroupIdentity, KafkaTransport, StartOffset,
    Subscription,
};
pub use delivery::{DeliveryLoop, DeliverySummary, StopHandle};
pub use dispatcher::{DispatchStats, MessageDispatcher};
pub use error::{Error, Result};
pub use sink::{LogSink, SinkError, WriterSink};
pub use transport::{RebalanceEvent, Transport, TransportEvent};

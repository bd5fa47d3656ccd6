//! Broker transport abstraction.
//!
//! The delivery loop only talks to a [`Transport`]. The rdkafka-backed
//! implementation lives in [`crate::consumer`]; a scripted one for tests lives
//! in [`crate::testing`].

use async_trait::async_trait;
use kafka_types::InboundMessage;

use crate::assignment::TopicPartition;
use crate::error::Result;

/// Partition ownership change announced by the group coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions newly assigned to this member
    Assigned(Vec<TopicPartition>),
    /// Partitions taken away from this member
    Revoked(Vec<TopicPartition>),
    /// The rebalance itself failed; ownership is unchanged
    Failed(String),
}

/// Something the transport hands to the delivery loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(InboundMessage),
    Rebalance(RebalanceEvent),
}

/// A consumer-group session after subscription.
///
/// Implementations must announce ownership through
/// [`TransportEvent::Rebalance`] before delivering messages of a partition,
/// and must deliver each partition's messages in offset order.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next message or rebalance.
    ///
    /// Must be cancel-safe: dropping the future must not lose a message.
    /// An `Err` is always treated as fatal by the delivery loop.
    async fn next_event(&mut self) -> Result<TransportEvent>;

    /// Commit `next_offset` (the offset after the last dispatched message)
    /// for a partition.
    async fn commit(&mut self, partition: &TopicPartition, next_offset: i64) -> Result<()>;

    /// Leave the group and close the session.
    async fn leave(&mut self) -> Result<()>;
}

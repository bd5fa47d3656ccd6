//! The delivery loop.
//!
//! Pulls events from a [`Transport`], keeps the [`PartitionTable`] current,
//! hands each owned message to the caller's handler and commits the offset
//! once the handler has returned, whatever its outcome.
//!
//! Ordering: at most one dispatch per partition is in flight, so a
//! partition's messages are handled strictly in the order the transport
//! delivered them. Across partitions up to `concurrency` dispatches may run
//! at once.

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use kafka_types::{DispatchOutcome, InboundMessage};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assignment::{PartitionTable, TopicPartition};
use crate::error::Result;
use crate::transport::{RebalanceEvent, Transport, TransportEvent};

/// Cooperative stop request for a delivery loop.
///
/// Cloning is cheap; every clone controls the same loop. Stopping twice is
/// the same as stopping once.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub dispatched: u64,
    pub failed: u64,
    pub skipped: u64,
}

struct Completed {
    tp: TopicPartition,
    offset: i64,
    outcome: DispatchOutcome,
}

enum Step {
    Stop,
    Completed(std::result::Result<Completed, JoinError>),
    Event(Result<TransportEvent>),
}

pub struct DeliveryLoop<T> {
    transport: T,
    table: PartitionTable,
    concurrency: usize,
    stop: StopHandle,
    in_flight: JoinSet<Completed>,
    busy: HashSet<TopicPartition>,
    summary: DeliverySummary,
}

impl<T: Transport> DeliveryLoop<T> {
    pub fn new(transport: T, concurrency: usize, stop: StopHandle) -> Self {
        Self {
            transport,
            table: PartitionTable::new(),
            concurrency: concurrency.max(1),
            stop,
            in_flight: JoinSet::new(),
            busy: HashSet::new(),
            summary: DeliverySummary::default(),
        }
    }

    /// Run until stopped or until the transport fails.
    ///
    /// In-flight dispatches always finish and are committed before the loop
    /// leaves the group, including when a fatal transport error ends it.
    pub async fn run<F, Fut>(mut self, on_message: F) -> Result<DeliverySummary>
    where
        F: Fn(InboundMessage) -> Fut,
        Fut: Future<Output = DispatchOutcome> + Send + 'static,
    {
        let outcome = match self.deliver(&on_message).await {
            Ok(()) => self.drain().await,
            Err(e) => {
                if let Err(drain_err) = self.drain().await {
                    warn!("Failed to finish in-flight messages: {drain_err}");
                }
                Err(e)
            }
        };

        let left = self.transport.leave().await;
        outcome?;
        left?;

        info!(
            "Delivery loop exited: dispatched={}, failed={}, skipped={}",
            self.summary.dispatched, self.summary.failed, self.summary.skipped
        );
        Ok(self.summary)
    }

    async fn deliver<F, Fut>(&mut self, on_message: &F) -> Result<()>
    where
        F: Fn(InboundMessage) -> Fut,
        Fut: Future<Output = DispatchOutcome> + Send + 'static,
    {
        loop {
            let step = tokio::select! {
                biased;
                _ = self.stop.stopped() => Step::Stop,
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    Step::Completed(joined)
                }
                event = self.transport.next_event() => Step::Event(event),
            };

            match step {
                Step::Stop => {
                    info!("Stop requested, leaving delivery loop");
                    return Ok(());
                }
                Step::Completed(joined) => self.complete(joined?).await?,
                Step::Event(event) => match event? {
                    TransportEvent::Rebalance(event) => self.rebalance(event).await?,
                    TransportEvent::Message(message) => {
                        if !self.dispatch(message, on_message).await? {
                            return Ok(());
                        }
                    }
                },
            }
        }
    }

    /// Returns `false` when a stop arrived while waiting for a free slot.
    async fn dispatch<F, Fut>(&mut self, message: InboundMessage, on_message: &F) -> Result<bool>
    where
        F: Fn(InboundMessage) -> Fut,
        Fut: Future<Output = DispatchOutcome> + Send + 'static,
    {
        let tp = TopicPartition::of(&message);
        if !self.table.owns(&tp) {
            debug!("Skipping message {tp}@{}: partition not owned", message.offset);
            self.summary.skipped += 1;
            return Ok(true);
        }
        while self.busy.contains(&tp) || self.in_flight.len() >= self.concurrency {
            match self.in_flight.join_next().await {
                Some(joined) => self.complete(joined?).await?,
                None => break,
            }
        }

        // Not dispatched and not committed, so it is redelivered later.
        if self.stop.is_stopped() {
            info!("Stop requested, leaving delivery loop");
            return Ok(false);
        }

        if self.table.is_committed(&tp, message.offset) {
            debug!("Skipping message {tp}@{}: already committed", message.offset);
            self.summary.skipped += 1;
            return Ok(true);
        }

        self.busy.insert(tp.clone());
        self.summary.dispatched += 1;
        let offset = message.offset;
        let handler = on_message(message);
        self.in_flight.spawn(async move {
            let outcome = AssertUnwindSafe(handler)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| DispatchOutcome::Failed("dispatch task panicked".to_string()));
            Completed {
                tp,
                offset,
                outcome,
            }
        });
        Ok(true)
    }

    async fn complete(&mut self, done: Completed) -> Result<()> {
        self.busy.remove(&done.tp);
        if let DispatchOutcome::Failed(reason) = &done.outcome {
            self.summary.failed += 1;
            debug!(
                "Message {}@{} failed ({reason}), advancing offset anyway",
                done.tp, done.offset
            );
        }

        if !self.table.holds(&done.tp) {
            debug!(
                "Not committing {}@{}: partition no longer held",
                done.tp, done.offset
            );
            return Ok(());
        }
        if let Some(next) = self.table.advance(&done.tp, done.offset) {
            self.transport.commit(&done.tp, next).await?;
        }
        Ok(())
    }

    async fn rebalance(&mut self, event: RebalanceEvent) -> Result<()> {
        match event {
            RebalanceEvent::Assigned(partitions) => {
                info!("Partitions assigned: {}", format_partitions(&partitions));
                self.table.assign(partitions);
            }
            RebalanceEvent::Revoked(partitions) => {
                info!("Partitions revoked: {}", format_partitions(&partitions));
                let revoking = self.table.begin_revoke(partitions);
                while revoking.iter().any(|tp| self.busy.contains(tp)) {
                    match self.in_flight.join_next().await {
                        Some(joined) => self.complete(joined?).await?,
                        None => break,
                    }
                }
                self.table.finish_revoke();
            }
            RebalanceEvent::Failed(reason) => {
                warn!("Rebalance failed: {reason}");
            }
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        while let Some(joined) = self.in_flight.join_next().await {
            self.complete(joined?).await?;
        }
        Ok(())
    }
}

fn format_partitions(partitions: &[TopicPartition]) -> String {
    partitions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

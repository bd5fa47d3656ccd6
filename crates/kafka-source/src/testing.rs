//! In-memory doubles for exercising the delivery loop without a broker.
//!
//! [`ScriptedTransport`] replays a fixed list of transport events and records
//! every commit; [`MemorySink`] keeps emitted records and can be told to fail
//! on chosen emits.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kafka_types::{InboundMessage, LogRecord};

use crate::assignment::TopicPartition;
use crate::delivery::StopHandle;
use crate::error::{Error, Result};
use crate::sink::{LogSink, SinkError};
use crate::transport::{RebalanceEvent, Transport, TransportEvent};

enum Step {
    Event(TransportEvent),
    Fatal(String),
}

/// What the transport saw, shared with the test after the loop took ownership.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub commits: Vec<(TopicPartition, i64)>,
    pub left: bool,
}

#[derive(Clone, Default)]
pub struct TransportProbe {
    log: Arc<Mutex<TransportLog>>,
}

impl TransportProbe {
    pub fn commits(&self) -> Vec<(TopicPartition, i64)> {
        self.lock().commits.clone()
    }

    /// Last committed offset for a partition.
    pub fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        self.lock()
            .commits
            .iter()
            .rev()
            .find(|(committed, _)| committed == tp)
            .map(|(_, offset)| *offset)
    }

    pub fn has_left(&self) -> bool {
        self.lock().left
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A transport that replays a script.
///
/// Once the script runs out it either requests a stop (see
/// [`ScriptedTransport::stop_when_drained`]) or waits forever like an idle
/// broker.
#[derive(Default)]
pub struct ScriptedTransport {
    steps: VecDeque<Step>,
    probe: TransportProbe,
    stop_when_drained: Option<StopHandle>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(mut self, topic: &str, partitions: impl IntoIterator<Item = i32>) -> Self {
        let partitions = partitions
            .into_iter()
            .map(|p| TopicPartition::new(topic, p))
            .collect();
        self.steps.push_back(Step::Event(TransportEvent::Rebalance(
            RebalanceEvent::Assigned(partitions),
        )));
        self
    }

    pub fn revoke(mut self, topic: &str, partitions: impl IntoIterator<Item = i32>) -> Self {
        let partitions = partitions
            .into_iter()
            .map(|p| TopicPartition::new(topic, p))
            .collect();
        self.steps.push_back(Step::Event(TransportEvent::Rebalance(
            RebalanceEvent::Revoked(partitions),
        )));
        self
    }

    pub fn message(mut self, topic: &str, partition: i32, offset: i64, body: &[u8]) -> Self {
        self.steps
            .push_back(Step::Event(TransportEvent::Message(InboundMessage::new(
                topic,
                partition,
                offset,
                body.to_vec(),
            ))));
        self
    }

    pub fn fatal(mut self, reason: &str) -> Self {
        self.steps.push_back(Step::Fatal(reason.to_string()));
        self
    }

    pub fn stop_when_drained(mut self, stop: StopHandle) -> Self {
        self.stop_when_drained = Some(stop);
        self
    }

    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn next_event(&mut self) -> Result<TransportEvent> {
        match self.steps.pop_front() {
            Some(Step::Event(event)) => Ok(event),
            Some(Step::Fatal(reason)) => Err(Error::FatalTransport(reason)),
            None => {
                if let Some(stop) = &self.stop_when_drained {
                    stop.stop();
                }
                std::future::pending().await
            }
        }
    }

    async fn commit(&mut self, partition: &TopicPartition, next_offset: i64) -> Result<()> {
        self.probe
            .lock()
            .commits
            .push((partition.clone(), next_offset));
        Ok(())
    }

    async fn leave(&mut self) -> Result<()> {
        self.probe.lock().left = true;
        Ok(())
    }
}

/// A sink that keeps every emitted record as parsed JSON.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<serde_json::Value>>,
    calls: AtomicUsize,
    fail_on: BTreeSet<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the emits with these zero-based call indices.
    pub fn failing_on(calls: impl IntoIterator<Item = usize>) -> Self {
        Self {
            fail_on: calls.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<serde_json::Value> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn emit(&self, record: &LogRecord) -> std::result::Result<(), SinkError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&call) {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "sink closed",
            )));
        }
        let line = record.to_json_line()?;
        let value = serde_json::from_str(&line)?;
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(value);
        Ok(())
    }
}

//! Per-message dispatch: decode, build the record, emit it.
//!
//! Failures never escape: they are reported on the tracing diagnostic
//! channel and returned as [`DispatchOutcome::Failed`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kafka_types::{DispatchOutcome, InboundMessage, LogRecord};
use tracing::{debug, error};

use crate::sink::LogSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

pub struct MessageDispatcher<S: ?Sized> {
    sink: Arc<S>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl<S: LogSink + ?Sized> MessageDispatcher<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self {
            sink,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Turn one message into one log record.
    ///
    /// Safe to call again for a redelivered message; the record is emitted
    /// again.
    pub async fn dispatch(&self, message: InboundMessage) -> DispatchOutcome {
        let record = LogRecord::db_change(&message);
        if !record.payload.is_structured() {
            debug!(
                "Message {}[{}]@{} is not JSON, logging raw body",
                message.topic, message.partition, message.offset
            );
        }

        match self.sink.emit(&record).await {
            Ok(()) => {
                let count = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
                if count % 1000 == 0 {
                    debug!("Delivered {count} log records total");
                }
                DispatchOutcome::Delivered
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Error processing message: {e}"
                );
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SinkError, WriterSink};
    use crate::testing::MemorySink;

    #[tokio::test]
    async fn test_dispatch_delivers_record() {
        let sink = Arc::new(MemorySink::new());
        let dispatcher = MessageDispatcher::new(Arc::clone(&sink));

        let outcome = dispatcher
            .dispatch(InboundMessage::new("tidb_cdc", 0, 0, br#"{"op":"insert"}"#.to_vec()))
            .await;

        assert_eq!(outcome, DispatchOutcome::Delivered);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["action"], "db_change");
        assert_eq!(records[0]["topic"], "tidb_cdc");
        assert_eq!(records[0]["payload"]["op"], "insert");
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                delivered: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_dispatch_reports_sink_failure() {
        let sink = Arc::new(MemorySink::failing_on([1]));
        let dispatcher = MessageDispatcher::new(Arc::clone(&sink));

        let ok = dispatcher
            .dispatch(InboundMessage::new("tidb_cdc", 0, 0, b"{}".to_vec()))
            .await;
        let failed = dispatcher
            .dispatch(InboundMessage::new("tidb_cdc", 0, 1, b"{}".to_vec()))
            .await;

        assert!(ok.is_delivered());
        assert!(matches!(failed, DispatchOutcome::Failed(reason) if reason.contains("failed to write")));
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                delivered: 1,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_redelivery_emits_again() {
        let dispatcher = MessageDispatcher::new(Arc::new(WriterSink::new(Vec::new())));
        let message = InboundMessage::new("tidb_cdc", 0, 7, b"not-json".to_vec());

        assert!(dispatcher.dispatch(message.clone()).await.is_delivered());
        assert!(dispatcher.dispatch(message).await.is_delivered());
        assert_eq!(dispatcher.stats().delivered, 2);
    }

    #[tokio::test]
    async fn test_dispatch_through_trait_object() {
        let sink: Arc<dyn LogSink> = Arc::new(MemorySink::new());
        let dispatcher = MessageDispatcher::new(sink);
        let outcome = dispatcher
            .dispatch(InboundMessage::new("tidb_cdc", 0, 0, b"[]".to_vec()))
            .await;
        assert_eq!(outcome, DispatchOutcome::Delivered);
    }

    #[test]
    fn test_sink_error_message() {
        let err = SinkError::Io(std::io::Error::other("disk full"));
        assert_eq!(err.to_string(), "failed to write log record: disk full");
    }
}

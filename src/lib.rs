//! cdc-log-consumer library
//!
//! Consumes change-data-capture events from a Kafka topic as a member of a
//! consumer group and writes each one to stdout as a single JSON log line.
//!
//! # Crates
//!
//! - `kafka_types` - message, payload and log record types, payload decoding
//! - `cdc_log_kafka_source` - consumer group client, delivery loop and log sink
//! - `cdc_log_kafka_producer` - producer for seeding topics in tests
//!
//! # CLI Usage
//!
//! ```bash
//! # Consume the default topic from the default broker
//! cdc-log-consumer
//!
//! # Explicit broker, topic and group, resuming from committed offsets
//! cdc-log-consumer --brokers kafka-1:9092,kafka-2:9092 --topic tidb_cdc \
//!   --group-id sre-consumer-group --start-offset from-committed
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub mod config;
pub mod shutdown;

// Re-export the Kafka source crate for convenience
pub use cdc_log_kafka_source as kafka;

pub use shutdown::{ShutdownCoordinator, ShutdownState, Signal};

#[derive(Parser, Debug)]
#[command(name = "cdc-log-consumer")]
#[command(about = "Consume CDC change events from Kafka and write them as JSON log lines")]
#[command(long_about = None)]
pub struct Cli {
    /// Kafka consumer configuration
    #[command(flatten)]
    pub config: kafka::Config,

    /// Upper bound for connecting to the brokers and fetching topic metadata.
    /// Format: duration in seconds or with units like "10s", "5m", "1h"
    #[arg(long, default_value = "10s", value_parser = config::parse_duration)]
    pub connect_timeout: Duration,

    /// Append log records to this file instead of writing them to stdout
    #[arg(long, env = "CDC_OUTPUT", value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Map the outcome of a run to the process exit code: 0 after an orderly
/// stop, 1 on any error. Errors are reported on stderr with their context chain.
pub fn exit_code<T>(result: &anyhow::Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    }
}

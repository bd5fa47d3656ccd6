//! Command-line interface for cdc-log-consumer
//!
//! # Usage Examples
//!
//! ```bash
//! # Defaults: broker kafka:9092, topic tidb_cdc, group sre-consumer-group
//! cdc-log-consumer
//!
//! # Configure through the environment
//! KAFKA_BROKER=localhost:9092 KAFKA_TOPIC=orders_cdc cdc-log-consumer
//!
//! # Process up to four partitions at a time and append records to a file
//! cdc-log-consumer --concurrency 4 --output /var/log/cdc.jsonl
//! ```
//!
//! Log records go to stdout (or `--output`); diagnostics go to stderr and are
//! filtered with `RUST_LOG`.

use std::sync::Arc;

use anyhow::Context;
use cdc_log_consumer::kafka::{run_log_sync, LogSink, StopHandle, WriterSink};
use cdc_log_consumer::{exit_code, Cli, ShutdownCoordinator};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    std::process::exit(exit_code(&run(cli).await));
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Initialize tracing on stderr; stdout carries the log records
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let stop = StopHandle::new();
    let coordinator = Arc::new(ShutdownCoordinator::for_stop_handle(stop.clone()));
    let signals = tokio::spawn(Arc::clone(&coordinator).watch_signals());

    let sink: Arc<dyn LogSink> = match &cli.output {
        Some(path) => Arc::new(
            WriterSink::append_file(path)
                .await
                .with_context(|| format!("Failed to open output file {path:?}"))?,
        ),
        None => Arc::new(WriterSink::stdout()),
    };

    let result = run_log_sync(cli.config, sink, stop, cli.connect_timeout).await;
    coordinator.finish();
    signals.abort();

    let summary = result.context("Kafka log consumer failed")?;
    info!(
        "Consumer stopped: {} dispatched, {} failed, {} skipped",
        summary.dispatched, summary.failed, summary.skipped
    );
    Ok(())
}

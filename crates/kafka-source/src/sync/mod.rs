//! Kafka CDC topic to structured log stream.

pub mod stream;

pub use stream::{log_handler, run_log_sync, Config};

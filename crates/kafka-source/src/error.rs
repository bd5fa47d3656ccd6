use thiserror::Error;

/// Errors surfaced by the consumer-group client and its delivery loop.
///
/// `Connection`, `Subscription` and `InvalidConfig` happen before the
/// delivery loop starts. `FatalTransport` ends a running loop. Per-message
/// failures never show up here; they become `DispatchOutcome::Failed`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Fatal transport error: {0}")]
    FatalTransport(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Client not ready: {0}")]
    NotReady(&'static str),

    #[error("Dispatch task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

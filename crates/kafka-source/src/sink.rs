//! Structured log sink.
//!
//! The sink is constructed once by the process entry point and shared by
//! reference with the dispatcher. Each record is rendered to a complete JSON
//! line before the writer lock is taken, and the line is flushed before the
//! lock is released, so concurrent emits never interleave. A line cut short
//! by a failed write is terminated before the next record is written.

use std::path::Path;

use async_trait::async_trait;
use kafka_types::LogRecord;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write log record: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for [`LogRecord`]s.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn emit(&self, record: &LogRecord) -> Result<(), SinkError>;
}

/// A sink over any async writer, one JSON object per line.
pub struct WriterSink<W> {
    out: Mutex<Output<W>>,
}

struct Output<W> {
    writer: W,
    /// A failed write left part of a line without its newline.
    torn: bool,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            out: Mutex::new(Output {
                writer,
                torn: false,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().writer
    }
}

impl<W> Output<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        if self.torn {
            self.writer.write_all(b"\n").await?;
            self.torn = false;
        }
        let mut written = 0;
        while written < line.len() {
            match self.writer.write(&line[written..]).await {
                Ok(0) => {
                    self.torn = written > 0;
                    return Err(std::io::ErrorKind::WriteZero.into());
                }
                Ok(n) => written += n,
                Err(e) => {
                    self.torn = written > 0;
                    return Err(e);
                }
            }
        }
        self.writer.flush().await
    }
}

impl WriterSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl WriterSink<tokio::fs::File> {
    /// Open `path` for appending, creating it if missing.
    pub async fn append_file(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }
}

#[async_trait]
impl<W> LogSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        let line = record.to_json_line()?;
        self.out.lock().await.write_line(line.as_bytes()).await?;
        Ok(())
    }
}

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{Message, QueueError};

/// Per-message options for [Writer::write].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Ask the broker to persist the message so that it survives a restart
    pub durable: bool,
}

/// Blocking, one-at-a-time consumer bound to a single queue.
#[async_trait]
pub trait Reader: Send {
    /// Wait for the next message. Returns [QueueError::Cancelled] if `cancel`
    /// fires first.
    async fn read(&mut self, cancel: &CancellationToken) -> Result<Message, QueueError>;

    /// Release the reader's session and link.
    async fn close(&mut self) -> Result<(), QueueError>;
}

/// Producer bound to a single queue.
#[async_trait]
pub trait Writer: Send {
    async fn write(
        &mut self,
        cancel: &CancellationToken,
        payload: &str,
        options: &WriteOptions,
    ) -> Result<(), QueueError>;

    async fn close(&mut self) -> Result<(), QueueError>;
}

#[async_trait]
pub trait ReaderFactory: Send + Sync {
    async fn new_reader(&self, queue_name: &str) -> Result<Box<dyn Reader>, QueueError>;

    /// Release the shared broker connection.
    async fn close(&self) -> Result<(), QueueError>;
}

#[async_trait]
pub trait WriterFactory: Send + Sync {
    async fn new_writer(&self, queue_name: &str) -> Result<Box<dyn Writer>, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

//! Per-project consumption loops. A [ConsumptionLoop] owns exactly one
//! [Reader] at a time and hands each message it reads to a [MessageHandler]
//! before reading the next one.

mod job;
mod worker;

pub use job::*;
pub use worker::*;

use anyhow::anyhow;
use async_trait::async_trait;
use conductor_queue::{Message, QueueError, Reader, ReaderFactory};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::SchedulerError;

/// Decides the fate of one message. Handlers must acknowledge every message
/// they are given unless they are interrupted by cancellation.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        message: Message,
    ) -> Result<(), SchedulerError>;
}

enum Interrupted {
    /// The reader went bad and should be replaced
    ReadFailed,
    Stopped(SchedulerError),
}

pub struct ConsumptionLoop<H: MessageHandler> {
    queue_name: String,
    readers: Arc<dyn ReaderFactory>,
    handler: H,
}

impl<H: MessageHandler> ConsumptionLoop<H> {
    pub fn new(queue_name: String, readers: Arc<dyn ReaderFactory>, handler: H) -> Self {
        ConsumptionLoop {
            queue_name,
            readers,
            handler,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Consume until cancelled. Failing to obtain a reader at all is fatal;
    /// a reader that fails mid-stream is closed and replaced.
    #[instrument(skip_all, fields(queue = %self.queue_name))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        debug!("Consumption loop started");

        loop {
            let mut reader = tokio::select! {
                _ = cancel.cancelled() => return Err(SchedulerError::Cancelled),
                reader = self.readers.new_reader(&self.queue_name) => match reader {
                    Ok(reader) => reader,
                    Err(QueueError::Cancelled) => return Err(SchedulerError::Cancelled),
                    Err(error) => {
                        return Err(SchedulerError::Fatal(anyhow!(
                            "Could not obtain a reader for {}: {}",
                            self.queue_name,
                            error
                        )))
                    }
                },
            };

            let interrupted = self.consume(&mut reader, cancel).await;

            if let Err(error) = reader.close().await {
                warn!("Could not close reader: {}", error);
            }

            match interrupted {
                Interrupted::ReadFailed => continue,
                Interrupted::Stopped(error) => return Err(error),
            }
        }
    }

    async fn consume(
        &self,
        reader: &mut Box<dyn Reader>,
        cancel: &CancellationToken,
    ) -> Interrupted {
        loop {
            let message = match reader.read(cancel).await {
                Ok(message) => message,
                Err(QueueError::Cancelled) => {
                    return Interrupted::Stopped(SchedulerError::Cancelled)
                }
                Err(error) => {
                    warn!("Read failed; replacing reader: {}", error);
                    return Interrupted::ReadFailed;
                }
            };

            trace!("Received {:?}", message);

            if let Err(error) = self.handler.handle(cancel, message).await {
                return Interrupted::Stopped(error);
            }
        }
    }
}

async fn acknowledge(message: Message) {
    if let Err(error) = message.ack().await {
        warn!("Could not acknowledge message: {}", error);
    }
}

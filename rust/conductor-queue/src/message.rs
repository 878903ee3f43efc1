use std::{fmt, future::Future, pin::Pin};

use crate::QueueError;

type AcknowledgeFuture = Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>>;
type AcknowledgeFn = Box<dyn FnOnce() -> AcknowledgeFuture + Send>;

/// A single delivery received from a queue. Acknowledging consumes the
/// [Message], so each delivery can be acknowledged at most once; once it is,
/// the broker will not redeliver it.
pub struct Message {
    payload: String,
    acknowledge: AcknowledgeFn,
}

impl Message {
    pub fn new<F, Fut>(payload: impl Into<String>, acknowledge: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), QueueError>> + Send + 'static,
    {
        Message {
            payload: payload.into(),
            acknowledge: Box::new(move || Box::pin(acknowledge())),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Tell the broker that this delivery has been handled.
    pub async fn ack(self) -> Result<(), QueueError> {
        (self.acknowledge)().await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("payload", &self.payload)
            .finish()
    }
}

use conductor_common::RetryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Could not connect to the broker: {0}")]
    Connect(#[from] RetryError),

    #[error("Invalid broker address: {0}")]
    Address(String),

    #[error("Could not open a link to queue {queue}: {message}")]
    Link { queue: String, message: String },

    #[error("Could not read from queue {queue}: {message}")]
    Read { queue: String, message: String },

    #[error("Could not write to queue {queue}: {message}")]
    Write { queue: String, message: String },

    #[error("Could not acknowledge message: {0}")]
    Acknowledge(String),

    #[error("Could not cleanly close {0}")]
    Close(String),

    #[error("The {0} has already been closed")]
    Closed(&'static str),

    #[error("Cancelled while waiting on the broker")]
    Cancelled,
}

impl QueueError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueueError::Cancelled)
    }
}

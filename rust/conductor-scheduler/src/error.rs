use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The scheduler was shut down without any task reporting a failure
    #[error("The scheduler was cancelled")]
    Cancelled,

    #[error("{0:#}")]
    Fatal(anyhow::Error),

    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfiguration(String),
}

impl SchedulerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SchedulerError::Cancelled)
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(error: anyhow::Error) -> Self {
        SchedulerError::Fatal(error)
    }
}

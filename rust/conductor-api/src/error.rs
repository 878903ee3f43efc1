use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the source-of-truth API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request to {0} could not be completed: {1}")]
    Transport(String, #[source] reqwest::Error),

    #[error("{0} was not found")]
    NotFound(String),

    #[error("Not authorized to access {0}")]
    Unauthorized(String),

    #[error("Unexpected status {status} from {url}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Could not decode response from {0}: {1}")]
    Decode(String, String),

    #[error("{0}")]
    Other(anyhow::Error),
}

impl ApiError {
    /// Whether the same request has a reasonable chance of succeeding if it
    /// is simply repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_, _) => true,
            ApiError::Status { status, .. } => matches!(
                StatusCode::from_u16(*status),
                Ok(StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT)
            ),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::Other(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> ApiError {
        ApiError::Status {
            url: "http://api/v2/substrate/running-jobs".into(),
            status,
            message: String::new(),
        }
    }

    #[test]
    fn it_retries_only_failures_that_may_clear_up() {
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(504).is_retryable());
        assert!(!status(500).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!ApiError::Unauthorized("/v2/projects".into()).is_retryable());
        assert!(!ApiError::NotFound("/v2/events/foo".into()).is_retryable());
    }
}

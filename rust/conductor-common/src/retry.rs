use anyhow::anyhow;
use rand::Rng;
use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The outcome of a single attempt made on behalf of [manage_retries].
#[derive(Debug)]
pub enum Attempt<T> {
    /// The attempt succeeded; stop retrying and hand back the value
    Done(T),
    /// The attempt did not succeed but may be tried again, optionally
    /// carrying the error that caused it to fail
    Retry(Option<anyhow::Error>),
    /// The attempt failed in a way that retrying cannot fix
    Abort(anyhow::Error),
}

/// Reasons that [manage_retries] gave up.
#[derive(Error, Debug)]
pub enum RetryError {
    /// The cancellation token fired while waiting for the next attempt
    #[error("Cancelled while waiting to retry")]
    Cancelled,

    /// The attempt budget was used up
    #[error("{label}: giving up after {attempts} failed attempts")]
    Exhausted {
        /// What was being attempted
        label: String,
        /// How many attempts were made
        attempts: u32,
        /// The error reported by the final attempt
        source: anyhow::Error,
    },

    /// An attempt reported a non-retryable failure
    #[error(transparent)]
    Aborted(anyhow::Error),
}

impl RetryError {
    /// True if retrying stopped because of cancellation rather than failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}

/// Repeatedly invoke `attempt` until it reports [Attempt::Done] or
/// [Attempt::Abort], sleeping for a jittered, exponentially growing delay
/// (capped at `max_backoff`) between failures.
///
/// A `max_attempts` of zero retries forever; otherwise the error of the last
/// attempt is wrapped in [RetryError::Exhausted] once `max_attempts` failures
/// have accumulated. Cancelling `cancel` interrupts any pending sleep.
pub async fn manage_retries<T, F, Fut>(
    cancel: &CancellationToken,
    label: &str,
    max_attempts: u32,
    max_backoff: Duration,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut failures = 0u32;

    loop {
        let last_error = match attempt().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(error) => return Err(RetryError::Aborted(error)),
            Attempt::Retry(error) => error,
        };

        failures = failures.saturating_add(1);

        if max_attempts > 0 && failures >= max_attempts {
            return Err(RetryError::Exhausted {
                label: label.to_owned(),
                attempts: failures,
                source: last_error.unwrap_or_else(|| anyhow!("failed {} attempts", failures)),
            });
        }

        let delay = jittered_exp_backoff(failures, max_backoff);

        match &last_error {
            Some(error) => debug!(
                "{}: attempt {} failed ({}); retrying in {:?}",
                label, failures, error, delay
            ),
            None => trace!("{}: attempt {} failed; retrying in {:?}", label, failures, delay),
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => (),
        }
    }
}

/// Compute a backoff for the given number of accumulated `failures`. The
/// base is `min(2^failures, max_backoff)` whole seconds, and the result lies
/// strictly between half of the base and the base itself.
///
/// Randomness comes from the calling thread's generator, so concurrent
/// callers never contend for (or corrupt) a shared source.
pub fn jittered_exp_backoff(failures: u32, max_backoff: Duration) -> Duration {
    let base_seconds = 2u64.saturating_pow(failures).min(max_backoff.as_secs());
    let half = Duration::from_millis(base_seconds.saturating_mul(500));
    let half_nanos = u64::try_from(half.as_nanos()).unwrap_or(u64::MAX);

    if half_nanos < 2 {
        return half;
    }

    let jitter = rand::thread_rng().gen_range(1..half_nanos);

    half + Duration::from_nanos(jitter)
}

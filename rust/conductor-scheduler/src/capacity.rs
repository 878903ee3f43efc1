use anyhow::anyhow;
use conductor_api::SubstrateCounter;
use conductor_common::{manage_retries, Attempt, RetryError};
use std::{sync::Arc, time::Duration};
use strum_macros::Display;
use tokio_util::sync::CancellationToken;

use crate::{
    admission::{AdmissionError, GateKeeper},
    SchedulerError,
};

/// Longest pause between two polls of the running-unit count.
pub const DEFAULT_CAPACITY_MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CapacityDomain {
    Workers,
    Jobs,
}

/// Watches the substrate's running-unit count for one [CapacityDomain] and
/// admits one unit at a time through its [GateKeeper] whenever the count is
/// below `max_concurrent`.
pub struct CapacityManager {
    domain: CapacityDomain,
    counter: Arc<dyn SubstrateCounter>,
    max_concurrent: u64,
    max_backoff: Duration,
    keeper: GateKeeper,
}

impl CapacityManager {
    pub fn new(
        domain: CapacityDomain,
        counter: Arc<dyn SubstrateCounter>,
        max_concurrent: u64,
        keeper: GateKeeper,
    ) -> Self {
        CapacityManager {
            domain,
            counter,
            max_concurrent,
            max_backoff: DEFAULT_CAPACITY_MAX_BACKOFF,
            keeper,
        }
    }

    pub fn domain(&self) -> CapacityDomain {
        self.domain
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    #[instrument(skip_all, fields(domain = %self.domain))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        info!("Capacity manager started (at most {} running)", self.max_concurrent);

        loop {
            match self.wait_for_capacity(cancel).await {
                Ok(running) => trace!("{} running; admitting one more", running),
                Err(RetryError::Cancelled) => return Err(SchedulerError::Cancelled),
                Err(error) => return Err(SchedulerError::Fatal(error.into())),
            }

            match self.keeper.grant(cancel).await {
                Ok(()) => (),
                Err(AdmissionError::Cancelled) => return Err(SchedulerError::Cancelled),
                Err(AdmissionError::Closed) => {
                    return Err(SchedulerError::Fatal(anyhow!(
                        "No consumers remain for {} capacity",
                        self.domain
                    )))
                }
            }
        }
    }

    async fn count(&self) -> Result<u64, conductor_api::ApiError> {
        match self.domain {
            CapacityDomain::Workers => self.counter.count_running_workers().await,
            CapacityDomain::Jobs => self.counter.count_running_jobs().await,
        }
    }

    /// Poll until fewer than `max_concurrent` units are running, returning the
    /// last observed count.
    async fn wait_for_capacity(&self, cancel: &CancellationToken) -> Result<u64, RetryError> {
        let label = format!("counting running {}", self.domain);
        let manager = self;

        manage_retries(cancel, &label, 0, self.max_backoff, move || async move {
            match manager.count().await {
                Ok(running) if running < manager.max_concurrent => Attempt::Done(running),
                Ok(running) => {
                    trace!("{} running; no capacity yet", running);
                    Attempt::Retry(None)
                }
                Err(error) if error.is_retryable() => {
                    warn!("Could not count running {}: {}", manager.domain, error);
                    Attempt::Retry(Some(error.into()))
                }
                Err(error) => Attempt::Abort(error.into()),
            }
        })
        .await
    }
}

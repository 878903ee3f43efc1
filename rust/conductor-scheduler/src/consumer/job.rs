use anyhow::anyhow;
use async_trait::async_trait;
use conductor_api::{
    data::{JobStatus, Phase},
    EventFetcher, Starter, StatusUpdater,
};
use conductor_queue::Message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{acknowledge, MessageHandler};
use crate::{
    admission::{AdmissionError, Gate},
    SchedulerError,
};

/// Split an `eventID:jobName` payload. Anything other than exactly two
/// non-empty tokens is malformed.
pub fn parse_job_reference(payload: &str) -> Option<(&str, &str)> {
    let mut tokens = payload.split(':');
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(event_id), Some(job_name), None) if !event_id.is_empty() && !job_name.is_empty() => {
            Some((event_id, job_name))
        }
        _ => None,
    }
}

/// Admits pending Jobs. Each message names one job of one event's Worker.
pub struct JobHandler {
    pub events: Arc<dyn EventFetcher>,
    pub statuses: Arc<dyn StatusUpdater>,
    pub starter: Arc<dyn Starter>,
    pub gate: Gate,
}

#[async_trait]
impl MessageHandler for JobHandler {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        message: Message,
    ) -> Result<(), SchedulerError> {
        let (event_id, job_name) = match parse_job_reference(message.payload()) {
            Some((event_id, job_name)) => (event_id.to_owned(), job_name.to_owned()),
            None => {
                warn!("Dropping malformed job reference {:?}", message.payload());
                acknowledge(message).await;
                return Ok(());
            }
        };

        let event = match self.events.get_event(&event_id).await {
            Ok(event) => event,
            Err(error) => {
                warn!("Could not fetch event {}: {}", event_id, error);
                let failed = JobStatus::new(Phase::SchedulingFailed);
                if let Err(error) = self
                    .statuses
                    .update_job_status(&event_id, &job_name, &failed)
                    .await
                {
                    warn!(
                        "Could not mark job {} of event {} as failed: {}",
                        job_name, event_id, error
                    );
                }
                acknowledge(message).await;
                return Ok(());
            }
        };

        let phase = match event.worker.job(&job_name) {
            Some(job) => job.status.phase,
            None => {
                warn!("Event {} has no job named {}; dropping", event_id, job_name);
                acknowledge(message).await;
                return Ok(());
            }
        };

        if !phase.is_pending() {
            debug!("Job {} of event {} is {}; nothing to do", job_name, event_id, phase);
            acknowledge(message).await;
            return Ok(());
        }

        let token = match self.gate.acquire(cancel).await {
            Ok(token) => token,
            Err(AdmissionError::Cancelled) => return Err(SchedulerError::Cancelled),
            Err(AdmissionError::Closed) => {
                return Err(SchedulerError::Fatal(anyhow!(
                    "Job capacity is no longer being managed"
                )))
            }
        };

        match self.starter.start_job(&event_id, &job_name).await {
            Ok(()) => info!("Started job {} of event {}", job_name, event_id),
            Err(error) => warn!(
                "Could not start job {} of event {}: {}",
                job_name, event_id, error
            ),
        }

        acknowledge(message).await;
        token.release();

        Ok(())
    }
}

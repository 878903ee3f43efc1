use anyhow::anyhow;
use async_trait::async_trait;
use conductor_api::{
    data::{Phase, WorkerStatus},
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

/// Admits pending Workers. Each message names one event.
pub struct WorkerHandler {
    pub events: Arc<dyn EventFetcher>,
    pub statuses: Arc<dyn StatusUpdater>,
    pub starter: Arc<dyn Starter>,
    pub gate: Gate,
}

#[async_trait]
impl MessageHandler for WorkerHandler {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        message: Message,
    ) -> Result<(), SchedulerError> {
        let event_id = message.payload().to_owned();

        let event = match self.events.get_event(&event_id).await {
            Ok(event) => event,
            Err(error) => {
                warn!("Could not fetch event {}: {}", event_id, error);
                if let Err(error) = self
                    .statuses
                    .update_worker_status(&event_id, &WorkerStatus::new(Phase::SchedulingFailed))
                    .await
                {
                    warn!("Could not mark worker for event {} as failed: {}", event_id, error);
                }
                acknowledge(message).await;
                return Ok(());
            }
        };

        let phase = event.worker.status.phase;
        if !phase.is_pending() {
            debug!("Worker for event {} is {}; nothing to do", event_id, phase);
            acknowledge(message).await;
            return Ok(());
        }

        let token = match self.gate.acquire(cancel).await {
            Ok(token) => token,
            Err(AdmissionError::Cancelled) => return Err(SchedulerError::Cancelled),
            Err(AdmissionError::Closed) => {
                return Err(SchedulerError::Fatal(anyhow!(
                    "Worker capacity is no longer being managed"
                )))
            }
        };

        match self.starter.start_worker(&event_id).await {
            Ok(()) => info!("Started worker for event {}", event_id),
            Err(error) => warn!("Could not start worker for event {}: {}", event_id, error),
        }

        acknowledge(message).await;
        token.release();

        Ok(())
    }
}

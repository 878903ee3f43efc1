use conductor_queue::ReaderFactory;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{Collaborators, Scheduler, SchedulerConfig, SchedulerError};

/// Run a [Scheduler] until `cancel` fires or a task fails, then release the
/// broker connection.
pub async fn serve(
    config: SchedulerConfig,
    collaborators: Collaborators,
    readers: Arc<dyn ReaderFactory>,
    cancel: &CancellationToken,
) -> Result<(), SchedulerError> {
    info!("Starting conductor scheduler...");
    debug!("{:?}", config);

    let scheduler = Scheduler::new(config, collaborators, readers.clone())?;
    let result = scheduler.run(cancel).await;

    if let Err(error) = readers.close().await {
        warn!("Could not close the broker connection: {}", error);
    }

    result
}

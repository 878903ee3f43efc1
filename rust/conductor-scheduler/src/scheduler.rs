use conductor_api::{Client, EventFetcher, ProjectLister, Starter, StatusUpdater, SubstrateCounter};
use conductor_queue::{job_queue_name, worker_queue_name, ReaderFactory};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    admission::{admission_gate, Gate},
    capacity::{CapacityDomain, CapacityManager, DEFAULT_CAPACITY_MAX_BACKOFF},
    consumer::{ConsumptionLoop, JobHandler, WorkerHandler},
    projects::{
        LoopSpawner, ProjectLifecycleManager, DEFAULT_PROJECT_PAGE_SIZE,
        DEFAULT_RECONCILE_INTERVAL,
    },
    SchedulerError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_concurrent_workers: u64,
    pub max_concurrent_jobs: u64,
    pub reconcile_interval: Duration,
    /// How long to wait for tasks to wind down once shutdown begins
    pub shutdown_grace: Duration,
    pub capacity_max_backoff: Duration,
    pub project_page_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_concurrent_workers: 1,
            max_concurrent_jobs: 3,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            shutdown_grace: Duration::from_secs(3),
            capacity_max_backoff: DEFAULT_CAPACITY_MAX_BACKOFF,
            project_page_size: DEFAULT_PROJECT_PAGE_SIZE,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |message: &str| Err(SchedulerError::InvalidConfiguration(message.into()));

        if self.max_concurrent_workers == 0 {
            return invalid("max concurrent workers must be at least 1");
        }
        if self.max_concurrent_jobs == 0 {
            return invalid("max concurrent jobs must be at least 1");
        }
        if self.reconcile_interval.is_zero() {
            return invalid("the project reconciliation interval must be non-zero");
        }
        if self.project_page_size == 0 {
            return invalid("the project page size must be at least 1");
        }
        Ok(())
    }
}

/// The collaborators the scheduler calls out to, one per concern.
#[derive(Clone)]
pub struct Collaborators {
    pub projects: Arc<dyn ProjectLister>,
    pub substrate: Arc<dyn SubstrateCounter>,
    pub events: Arc<dyn EventFetcher>,
    pub statuses: Arc<dyn StatusUpdater>,
    pub starter: Arc<dyn Starter>,
}

impl From<Client> for Collaborators {
    fn from(client: Client) -> Self {
        let client = Arc::new(client);
        Collaborators {
            projects: client.clone(),
            substrate: client.clone(),
            events: client.clone(),
            statuses: client.clone(),
            starter: client,
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    collaborators: Collaborators,
    readers: Arc<dyn ReaderFactory>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        collaborators: Collaborators,
        readers: Arc<dyn ReaderFactory>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Scheduler {
            config,
            collaborators,
            readers,
        })
    }

    /// Run every scheduler task until `cancel` is cancelled or one of them
    /// fails. The first failure is returned; a plain cancellation yields
    /// [SchedulerError::Cancelled].
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        let root = cancel.child_token();
        let tracker = TaskTracker::new();
        let (errors, mut first_error) = unbounded_channel();

        let (worker_keeper, worker_gate) = admission_gate();
        let (job_keeper, job_gate) = admission_gate();

        let capacity_managers = [
            CapacityManager::new(
                CapacityDomain::Workers,
                self.collaborators.substrate.clone(),
                self.config.max_concurrent_workers,
                worker_keeper,
            ),
            CapacityManager::new(
                CapacityDomain::Jobs,
                self.collaborators.substrate.clone(),
                self.config.max_concurrent_jobs,
                job_keeper,
            ),
        ];

        for manager in capacity_managers {
            let manager = manager.with_max_backoff(self.config.capacity_max_backoff);
            let cancel = root.clone();
            let name = format!("{} capacity manager", manager.domain());
            spawn_reporting(&tracker, &errors, name, async move {
                manager.run(&cancel).await
            });
        }

        let spawner = Arc::new(TrackedLoopSpawner {
            tracker: tracker.clone(),
            errors: errors.clone(),
            readers: self.readers.clone(),
            collaborators: self.collaborators.clone(),
            worker_gate,
            job_gate,
        });

        let projects = ProjectLifecycleManager::new(self.collaborators.projects.clone(), spawner)
            .with_interval(self.config.reconcile_interval)
            .with_page_size(self.config.project_page_size);

        {
            let cancel = root.clone();
            spawn_reporting(&tracker, &errors, "project lifecycle manager", async move {
                projects.run(&cancel).await
            });
        }

        info!("Scheduler started");

        let outcome = tokio::select! {
            _ = root.cancelled() => None,
            Some(error) = first_error.recv() => Some(error),
        };

        root.cancel();
        // An error may have been reported at the same moment as cancellation
        let outcome = outcome.or_else(|| first_error.try_recv().ok());

        tracker.close();
        if tokio::time::timeout(self.config.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} scheduler tasks did not stop within {:?}",
                tracker.len(),
                self.config.shutdown_grace
            );
        }

        match outcome {
            Some(error) => {
                error!("Scheduler stopped: {}", error);
                Err(error)
            }
            None => {
                info!("Scheduler stopped");
                Err(SchedulerError::Cancelled)
            }
        }
    }
}

/// Spawn `task` on `tracker`, forwarding any failure other than cancellation
/// to `errors`.
fn spawn_reporting<F>(
    tracker: &TaskTracker,
    errors: &UnboundedSender<SchedulerError>,
    name: impl Into<String>,
    task: F,
) where
    F: Future<Output = Result<(), SchedulerError>> + Send + 'static,
{
    let name = name.into();
    let errors = errors.clone();

    tracker.spawn(async move {
        match task.await {
            Ok(()) | Err(SchedulerError::Cancelled) => debug!("The {} stopped", name),
            Err(error) => {
                error!("The {} failed: {}", name, error);
                let _ = errors.send(error);
            }
        }
    });
}

struct TrackedLoopSpawner {
    tracker: TaskTracker,
    errors: UnboundedSender<SchedulerError>,
    readers: Arc<dyn ReaderFactory>,
    collaborators: Collaborators,
    worker_gate: Gate,
    job_gate: Gate,
}

impl LoopSpawner for TrackedLoopSpawner {
    fn spawn_loops(&self, project_id: &str, cancel: CancellationToken) {
        let collaborators = &self.collaborators;

        let worker_loop = ConsumptionLoop::new(
            worker_queue_name(project_id),
            self.readers.clone(),
            WorkerHandler {
                events: collaborators.events.clone(),
                statuses: collaborators.statuses.clone(),
                starter: collaborators.starter.clone(),
                gate: self.worker_gate.clone(),
            },
        );

        let job_loop = ConsumptionLoop::new(
            job_queue_name(project_id),
            self.readers.clone(),
            JobHandler {
                events: collaborators.events.clone(),
                statuses: collaborators.statuses.clone(),
                starter: collaborators.starter.clone(),
                gate: self.job_gate.clone(),
            },
        );

        {
            let cancel = cancel.clone();
            spawn_reporting(
                &self.tracker,
                &self.errors,
                format!("worker loop for {project_id}"),
                async move { worker_loop.run(&cancel).await },
            );
        }

        spawn_reporting(
            &self.tracker,
            &self.errors,
            format!("job loop for {project_id}"),
            async move { job_loop.run(&cancel).await },
        );
    }
}

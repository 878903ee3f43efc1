use anyhow::anyhow;
use conductor_api::{data::ListOptions, ProjectLister};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::SchedulerError;

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PROJECT_PAGE_SIZE: u32 = 100;

/// Starts the Worker loop and the Job loop for one project. Both loops must
/// stop once `cancel` is cancelled.
pub trait LoopSpawner: Send + Sync {
    fn spawn_loops(&self, project_id: &str, cancel: CancellationToken);
}

#[derive(Debug)]
pub struct ProjectHandle {
    pub project_id: String,
    cancel: CancellationToken,
}

impl ProjectHandle {
    fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Keeps one pair of consumption loops running for every project the API
/// knows about, and none for projects it has forgotten.
pub struct ProjectLifecycleManager {
    lister: Arc<dyn ProjectLister>,
    spawner: Arc<dyn LoopSpawner>,
    interval: Duration,
    page_size: u32,
    registry: HashMap<String, ProjectHandle>,
}

impl ProjectLifecycleManager {
    pub fn new(lister: Arc<dyn ProjectLister>, spawner: Arc<dyn LoopSpawner>) -> Self {
        ProjectLifecycleManager {
            lister,
            spawner,
            interval: DEFAULT_RECONCILE_INTERVAL,
            page_size: DEFAULT_PROJECT_PAGE_SIZE,
            registry: HashMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// IDs of the projects whose loops are currently running, in order.
    pub fn tracked(&self) -> Vec<&str> {
        let mut tracked: Vec<&str> = self
            .registry
            .values()
            .map(|handle| handle.project_id.as_str())
            .collect();
        tracked.sort_unstable();
        tracked
    }

    /// Reconcile immediately and then once per interval, until cancelled or
    /// until the project list cannot be read.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        let mut ticks = tokio::time::interval(self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(SchedulerError::Cancelled),
                _ = ticks.tick() => (),
            };

            if let Err(error) = self.reconcile(cancel).await {
                break Err(error);
            }
        };

        for handle in self.registry.values() {
            handle.stop();
        }

        result
    }

    pub async fn reconcile(&mut self, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        let current = self.list_all_projects().await?;

        self.registry.retain(|project_id, handle| {
            let keep = current.contains(project_id);
            if !keep {
                info!("Project {} is gone; stopping its loops", project_id);
                handle.stop();
            }
            keep
        });

        for project_id in current {
            if self.registry.contains_key(&project_id) {
                continue;
            }

            info!("Found new project {}; starting its loops", project_id);
            let child = cancel.child_token();
            self.spawner.spawn_loops(&project_id, child.clone());
            self.registry.insert(
                project_id.clone(),
                ProjectHandle {
                    project_id,
                    cancel: child,
                },
            );
        }

        Ok(())
    }

    /// Page through every project. Any failed page fails the whole listing.
    async fn list_all_projects(&self) -> Result<BTreeSet<String>, SchedulerError> {
        let mut projects = BTreeSet::new();
        let mut options = ListOptions {
            limit: self.page_size,
            ..Default::default()
        };

        loop {
            let page = self.lister.list_projects(&options).await.map_err(|error| {
                SchedulerError::Fatal(anyhow!("Could not list projects: {}", error))
            })?;

            projects.extend(page.items.iter().map(|project| project.id().to_owned()));

            if page.metadata.continue_token.is_empty() {
                break;
            }
            trace!(
                "{} projects so far, {:?} remaining",
                projects.len(),
                page.metadata.remaining_item_count
            );
            options.continue_token = page.metadata.continue_token;
        }

        Ok(projects)
    }
}

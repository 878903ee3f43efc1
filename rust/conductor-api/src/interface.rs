use async_trait::async_trait;

use crate::{
    data::{Event, JobStatus, ListOptions, ProjectList, WorkerStatus},
    ApiError,
};

/// Lists the projects (tenants) known to the API, one page at a time.
#[async_trait]
pub trait ProjectLister: Send + Sync {
    async fn list_projects(&self, options: &ListOptions) -> Result<ProjectList, ApiError>;
}

/// Reports how many units the execution substrate is currently running.
#[async_trait]
pub trait SubstrateCounter: Send + Sync {
    async fn count_running_workers(&self) -> Result<u64, ApiError>;

    async fn count_running_jobs(&self) -> Result<u64, ApiError>;
}

#[async_trait]
pub trait EventFetcher: Send + Sync {
    async fn get_event(&self, event_id: &str) -> Result<Event, ApiError>;
}

/// Records phase transitions decided by the scheduler.
#[async_trait]
pub trait StatusUpdater: Send + Sync {
    async fn update_worker_status(
        &self,
        event_id: &str,
        status: &WorkerStatus,
    ) -> Result<(), ApiError>;

    async fn update_job_status(
        &self,
        event_id: &str,
        job_name: &str,
        status: &JobStatus,
    ) -> Result<(), ApiError>;
}

/// Asks the substrate to launch a unit that has been admitted.
#[async_trait]
pub trait Starter: Send + Sync {
    async fn start_worker(&self, event_id: &str) -> Result<(), ApiError>;

    async fn start_job(&self, event_id: &str, job_name: &str) -> Result<(), ApiError>;
}

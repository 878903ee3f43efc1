//! A fake source-of-truth API that records the calls the scheduler makes.
#![allow(dead_code)]

use async_trait::async_trait;
use conductor_api::{
    data::{
        Event, Job, JobStatus, ListMeta, ListOptions, ObjectMeta, Phase, Project, ProjectList,
        Worker, WorkerStatus,
    },
    ApiError, EventFetcher, ProjectLister, Starter, StatusUpdater, SubstrateCounter,
};
use conductor_scheduler::{
    admission::{admission_gate, Gate},
    Collaborators,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListProjects(String),
    GetEvent(String),
    UpdateWorkerStatus(String, Phase),
    UpdateJobStatus(String, String, Phase),
    StartWorker(String),
    StartJob(String, String),
}

#[derive(Default)]
pub struct FakeState {
    pub projects: Vec<String>,
    pub events: HashMap<String, Event>,
    pub running_workers: u64,
    pub running_jobs: u64,
    pub fail_listing: bool,
    pub fail_starts: bool,
    pub fail_updates: bool,
    pub page_size: usize,
    pub calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeApi::default())
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_projects(&self, projects: &[&str]) {
        self.state().projects = projects.iter().map(|id| id.to_string()).collect();
    }

    pub fn add_event(&self, event: Event) {
        self.state().events.insert(event.id().to_owned(), event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Every call other than project listing, in order.
    pub fn event_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::ListProjects(_)))
            .collect()
    }

    pub fn starts(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::StartWorker(_) | Call::StartJob(_, _)))
            .collect()
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            projects: self.clone(),
            substrate: self.clone(),
            events: self.clone(),
            statuses: self.clone(),
            starter: self.clone(),
        }
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }
}

fn server_error(path: &str) -> ApiError {
    ApiError::Status {
        url: format!("http://api.test{path}"),
        status: 500,
        message: "induced failure".into(),
    }
}

#[async_trait]
impl ProjectLister for FakeApi {
    async fn list_projects(&self, options: &ListOptions) -> Result<ProjectList, ApiError> {
        self.record(Call::ListProjects(options.continue_token.clone()));
        let state = self.state();
        if state.fail_listing {
            return Err(server_error("/v2/projects"));
        }

        let page_size = if state.page_size == 0 {
            options.limit as usize
        } else {
            state.page_size
        };
        let start: usize = options.continue_token.parse().unwrap_or(0);
        let end = (start + page_size).min(state.projects.len());

        Ok(ProjectList {
            metadata: ListMeta {
                continue_token: if end < state.projects.len() {
                    end.to_string()
                } else {
                    String::new()
                },
                remaining_item_count: Some((state.projects.len() - end) as u64),
            },
            items: state.projects[start..end]
                .iter()
                .map(|id| Project {
                    metadata: ObjectMeta { id: id.clone() },
                })
                .collect(),
        })
    }
}

#[async_trait]
impl SubstrateCounter for FakeApi {
    async fn count_running_workers(&self) -> Result<u64, ApiError> {
        Ok(self.state().running_workers)
    }

    async fn count_running_jobs(&self) -> Result<u64, ApiError> {
        Ok(self.state().running_jobs)
    }
}

#[async_trait]
impl EventFetcher for FakeApi {
    async fn get_event(&self, event_id: &str) -> Result<Event, ApiError> {
        self.record(Call::GetEvent(event_id.to_owned()));
        self.state()
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("/v2/events/{event_id}")))
    }
}

#[async_trait]
impl StatusUpdater for FakeApi {
    async fn update_worker_status(
        &self,
        event_id: &str,
        status: &WorkerStatus,
    ) -> Result<(), ApiError> {
        self.record(Call::UpdateWorkerStatus(event_id.to_owned(), status.phase));
        if self.state().fail_updates {
            return Err(server_error("/v2/events/worker/status"));
        }
        Ok(())
    }

    async fn update_job_status(
        &self,
        event_id: &str,
        job_name: &str,
        status: &JobStatus,
    ) -> Result<(), ApiError> {
        self.record(Call::UpdateJobStatus(
            event_id.to_owned(),
            job_name.to_owned(),
            status.phase,
        ));
        if self.state().fail_updates {
            return Err(server_error("/v2/events/worker/jobs/status"));
        }
        Ok(())
    }
}

#[async_trait]
impl Starter for FakeApi {
    async fn start_worker(&self, event_id: &str) -> Result<(), ApiError> {
        self.record(Call::StartWorker(event_id.to_owned()));
        if self.state().fail_starts {
            return Err(server_error("/v2/events/worker/start"));
        }
        Ok(())
    }

    async fn start_job(&self, event_id: &str, job_name: &str) -> Result<(), ApiError> {
        self.record(Call::StartJob(event_id.to_owned(), job_name.to_owned()));
        if self.state().fail_starts {
            return Err(server_error("/v2/events/worker/jobs/start"));
        }
        Ok(())
    }
}

/// An event whose worker is in `worker_phase` and has the given jobs.
pub fn event(id: &str, worker_phase: Phase, jobs: &[(&str, Phase)]) -> Event {
    Event {
        metadata: ObjectMeta { id: id.to_owned() },
        project_id: None,
        worker: Worker {
            status: WorkerStatus::new(worker_phase),
            jobs: jobs
                .iter()
                .map(|(name, phase)| Job {
                    name: name.to_string(),
                    status: JobStatus::new(*phase),
                })
                .collect(),
        },
    }
}

/// A gate whose keeper grants tokens as fast as they are returned, along
/// with a count of the tokens it has taken back.
pub fn open_gate(cancel: &CancellationToken) -> (Gate, Arc<Mutex<usize>>) {
    let (keeper, gate) = admission_gate();
    let returned = Arc::new(Mutex::new(0usize));

    tokio::spawn({
        let cancel = cancel.clone();
        let returned = returned.clone();
        async move {
            while keeper.grant(&cancel).await.is_ok() {
                *returned.lock().unwrap() += 1;
            }
        }
    });

    (gate, returned)
}

use serde::{Deserialize, Serialize};
use strum_macros::Display;

pub trait AsQuery {
    fn as_query(&self) -> Option<String>;
}

impl AsQuery for () {
    fn as_query(&self) -> Option<String> {
        None
    }
}

/// Lifecycle state shared by Workers and Jobs. The scheduler only ever acts
/// on units in [Phase::Pending]; every other phase belongs to some other
/// actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Pending,
    Starting,
    SchedulingFailed,
    Running,
    Succeeded,
    Failed,
    Aborted,
    Canceled,
    TimedOut,
    #[serde(other)]
    Unknown,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Unknown
    }
}

impl Phase {
    pub fn is_pending(&self) -> bool {
        matches!(self, Phase::Pending)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    #[serde(default)]
    pub phase: Phase,
}

impl WorkerStatus {
    pub fn new(phase: Phase) -> Self {
        WorkerStatus { phase }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub phase: Phase,
}

impl JobStatus {
    pub fn new(phase: Phase) -> Self {
        JobStatus { phase }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    #[serde(default)]
    pub status: JobStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    #[serde(default)]
    pub status: WorkerStatus,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl Worker {
    /// Look up one of this worker's jobs by name.
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub metadata: ObjectMeta,
    #[serde(rename = "projectID", default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub worker: Worker,
}

impl Event {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub metadata: ObjectMeta,
}

impl Project {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMeta {
    #[serde(rename = "continue", default)]
    pub continue_token: String,
    #[serde(rename = "remainingItemCount", default)]
    pub remaining_item_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<Project>,
}

/// Pagination parameters for list operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub continue_token: String,
    pub limit: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        ListOptions {
            continue_token: String::new(),
            limit: 100,
        }
    }
}

impl AsQuery for ListOptions {
    fn as_query(&self) -> Option<String> {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if !self.continue_token.is_empty() {
            query.append_pair("continue", &self.continue_token);
        }
        query.append_pair("limit", &self.limit.to_string());
        Some(query.finish())
    }
}

/// The substrate's answer to "how many units are running right now?"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstrateCount {
    pub count: u64,
}

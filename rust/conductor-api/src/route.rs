use anyhow::{anyhow, Result};
use std::fmt::Display;
use url::Url;

use crate::data::AsQuery;

pub const API_VERSION: &str = "v2";

pub enum Route {
    Projects,
    RunningWorkers,
    RunningJobs,
    Event(String),
    WorkerStatus(String),
    WorkerStart(String),
    JobStatus(String, String),
    JobStart(String, String),
}

impl Route {
    fn segments(&self) -> Vec<&str> {
        let mut segments = vec![API_VERSION];
        match self {
            Route::Projects => segments.push("projects"),
            Route::RunningWorkers => segments.extend(["substrate", "running-workers"]),
            Route::RunningJobs => segments.extend(["substrate", "running-jobs"]),
            Route::Event(event) => segments.extend(["events", event.as_str()]),
            Route::WorkerStatus(event) => {
                segments.extend(["events", event.as_str(), "worker", "status"])
            }
            Route::WorkerStart(event) => {
                segments.extend(["events", event.as_str(), "worker", "start"])
            }
            Route::JobStatus(event, job) => segments.extend([
                "events",
                event.as_str(),
                "worker",
                "jobs",
                job.as_str(),
                "status",
            ]),
            Route::JobStart(event, job) => segments.extend([
                "events",
                event.as_str(),
                "worker",
                "jobs",
                job.as_str(),
                "start",
            ]),
        };
        segments
    }
}

impl Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments().join("/"))
    }
}

pub struct RouteUrl<'a, 'b, Params: AsQuery = ()>(pub &'a Url, pub Route, pub Option<&'b Params>);

impl<'a, 'b, Params: AsQuery> TryFrom<RouteUrl<'a, 'b, Params>> for Url {
    type Error = anyhow::Error;

    fn try_from(value: RouteUrl<'a, 'b, Params>) -> Result<Self, Self::Error> {
        let RouteUrl(api_base, route, params) = value;
        let mut url = api_base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("{} cannot be used as an API base", api_base))?
            .clear()
            .extend(route.segments());
        url.set_query(params.and_then(|params| params.as_query()).as_deref());
        Ok(url)
    }
}

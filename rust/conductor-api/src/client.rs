use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::{
    data::{
        AsQuery, Event, JobStatus, ListOptions, ProjectList, SubstrateCount, WorkerStatus,
    },
    route::{Route, RouteUrl},
    ApiError, EventFetcher, ProjectLister, Starter, StatusUpdater, SubstrateCounter,
};

/// A [Client] is a thin HTTP client for the parts of the source-of-truth
/// REST API that the scheduler relies upon. Every request is authorized with
/// the scheduler's bearer token.
#[derive(Clone)]
pub struct Client {
    pub api_base: Url,
    token: String,
    client: reqwest::Client,
}

impl Client {
    pub fn new(api_base: &Url, token: &str, allow_insecure_connections: bool) -> Result<Self> {
        debug!("Initializing API client targetting {}", api_base);

        if allow_insecure_connections {
            warn!("TLS certificate verification is disabled for {}", api_base);
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(allow_insecure_connections)
            .build()
            .map_err(|error| anyhow!("Could not build HTTP client: {}", error))?;

        Ok(Client {
            api_base: api_base.clone(),
            token: token.to_owned(),
            client,
        })
    }

    fn url<P: AsQuery>(&self, route: Route, params: Option<&P>) -> Result<Url, ApiError> {
        Ok(RouteUrl(&self.api_base, route, params).try_into()?)
    }

    async fn get<T, P>(&self, route: Route, params: Option<&P>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        P: AsQuery,
    {
        let url = self.url(route, params)?;
        trace!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|error| ApiError::Transport(url.to_string(), error))?;

        check_status(&url, response)
            .await?
            .json::<T>()
            .await
            .map_err(|error| ApiError::Decode(url.to_string(), error.to_string()))
    }

    async fn put<B>(&self, route: Route, body: Option<&B>) -> Result<(), ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url::<()>(route, None)?;
        trace!("PUT {}", url);

        let mut request = self.client.put(url.clone()).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|error| ApiError::Transport(url.to_string(), error))?;

        check_status(&url, response).await?;
        Ok(())
    }
}

async fn check_status(
    url: &Url,
    response: reqwest::Response,
) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(url.path().to_owned()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Unauthorized(url.path().to_owned())
        }
        status => ApiError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        },
    })
}

#[async_trait]
impl ProjectLister for Client {
    async fn list_projects(&self, options: &ListOptions) -> Result<ProjectList, ApiError> {
        self.get(Route::Projects, Some(options)).await
    }
}

#[async_trait]
impl SubstrateCounter for Client {
    async fn count_running_workers(&self) -> Result<u64, ApiError> {
        let count: SubstrateCount = self.get::<_, ()>(Route::RunningWorkers, None).await?;
        Ok(count.count)
    }

    async fn count_running_jobs(&self) -> Result<u64, ApiError> {
        let count: SubstrateCount = self.get::<_, ()>(Route::RunningJobs, None).await?;
        Ok(count.count)
    }
}

#[async_trait]
impl EventFetcher for Client {
    async fn get_event(&self, event_id: &str) -> Result<Event, ApiError> {
        self.get::<_, ()>(Route::Event(event_id.to_owned()), None)
            .await
    }
}

#[async_trait]
impl StatusUpdater for Client {
    async fn update_worker_status(
        &self,
        event_id: &str,
        status: &WorkerStatus,
    ) -> Result<(), ApiError> {
        self.put(Route::WorkerStatus(event_id.to_owned()), Some(status))
            .await
    }

    async fn update_job_status(
        &self,
        event_id: &str,
        job_name: &str,
        status: &JobStatus,
    ) -> Result<(), ApiError> {
        self.put(
            Route::JobStatus(event_id.to_owned(), job_name.to_owned()),
            Some(status),
        )
        .await
    }
}

#[async_trait]
impl Starter for Client {
    async fn start_worker(&self, event_id: &str) -> Result<(), ApiError> {
        self.put::<()>(Route::WorkerStart(event_id.to_owned()), None)
            .await
    }

    async fn start_job(&self, event_id: &str, job_name: &str) -> Result<(), ApiError> {
        self.put::<()>(
            Route::JobStart(event_id.to_owned(), job_name.to_owned()),
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_refuses_an_api_base_that_cannot_hold_a_path() {
        let base = Url::parse("mailto:ops@example.com").unwrap();
        let client = Client::new(&base, "t", false).unwrap();
        assert!(matches!(
            client.url::<()>(Route::Projects, None),
            Err(ApiError::Other(_))
        ));
    }

    #[tokio::test]
    async fn it_reports_unreachable_apis_as_retryable() {
        // Nothing listens on the discard port
        let client = Client::new(&Url::parse("http://127.0.0.1:9").unwrap(), "t", false).unwrap();
        let error = client.count_running_jobs().await.unwrap_err();
        assert!(matches!(error, ApiError::Transport(_, _)));
        assert!(error.is_retryable());
    }
}

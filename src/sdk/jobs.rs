//! REST client for create-then-poll generation endpoints.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::GatewayError;
use crate::job::{PollPolicy, PollableJob, run_job};
use crate::sdk::retry::{RetryPolicy, parse_json_response, send_with_retry};

/// Shape of one job-based endpoint: where jobs are created and polled, where
/// the id and status live in the JSON body, and which statuses end the job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobApi {
    pub create_path: String,
    /// Status path with an `{id}` placeholder.
    pub status_path: String,
    pub id_pointer: String,
    pub status_pointer: String,
    pub terminal_statuses: Vec<String>,
    pub success_statuses: Vec<String>,
}

impl JobApi {
    pub fn new(create_path: impl Into<String>, status_path: impl Into<String>) -> Self {
        Self {
            create_path: create_path.into(),
            status_path: status_path.into(),
            id_pointer: "/id".to_string(),
            status_pointer: "/status".to_string(),
            terminal_statuses: vec!["completed".to_string(), "failed".to_string()],
            success_statuses: vec!["completed".to_string()],
        }
    }

    pub fn openai_videos() -> Self {
        Self::new("/videos", "/videos/{id}")
    }

    pub fn with_pointers(mut self, id_pointer: &str, status_pointer: &str) -> Self {
        self.id_pointer = id_pointer.to_string();
        self.status_pointer = status_pointer.to_string();
        self
    }

    pub fn with_statuses(mut self, terminal: &[&str], success: &[&str]) -> Self {
        self.terminal_statuses = terminal.iter().map(|status| status.to_string()).collect();
        self.success_statuses = success.iter().map(|status| status.to_string()).collect();
        self
    }

    pub fn is_terminal(&self, status: &str) -> bool {
        self.terminal_statuses
            .iter()
            .any(|terminal| terminal.eq_ignore_ascii_case(status))
    }

    pub fn is_success(&self, status: &str) -> bool {
        self.success_statuses
            .iter()
            .any(|success| success.eq_ignore_ascii_case(status))
    }

    pub fn status_path_for(&self, id: &str) -> String {
        self.status_path.replace("{id}", id)
    }

    /// Reads id and status out of a create or status body. Status bodies
    /// that omit the id keep `known_id`.
    pub fn job_from(
        &self,
        payload: Value,
        known_id: Option<&str>,
    ) -> Result<PollableJob<String, Value>, GatewayError> {
        let id = payload
            .pointer(&self.id_pointer)
            .and_then(Value::as_str)
            .or(known_id)
            .ok_or_else(|| GatewayError::Decode("Job response is missing an id".to_string()))?
            .to_string();

        let status = payload
            .pointer(&self.status_pointer)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::Decode(format!("Job {id} response is missing a status"))
            })?
            .to_string();

        Ok(PollableJob::new(id, status, payload))
    }
}

#[derive(Clone)]
pub struct JobClient {
    client: reqwest::Client,
    base_url: String,
    api: JobApi,
    retry_policy: RetryPolicy,
    poll_policy: PollPolicy,
}

impl JobClient {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api: JobApi,
        retry_policy: RetryPolicy,
        poll_policy: PollPolicy,
    ) -> Self {
        Self {
            client,
            base_url,
            api,
            retry_policy,
            poll_policy,
        }
    }

    pub fn api(&self) -> &JobApi {
        &self.api
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn headers(api_key: &str) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| GatewayError::Unauthorized("Invalid API key".to_string()))?,
        );
        Ok(headers)
    }

    /// Creates a job, polls it to a terminal status and returns the final
    /// payload. Terminal statuses outside the success set become
    /// [`GatewayError::JobFailed`].
    pub async fn run(
        &self,
        api_key: &str,
        request: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, GatewayError> {
        let headers = Self::headers(api_key)?;

        let create = async {
            let response = send_with_retry(
                || {
                    self.client
                        .post(self.endpoint(&self.api.create_path))
                        .headers(headers.clone())
                        .json(&request)
                },
                self.retry_policy,
            )
            .await?;
            let job = self.api.job_from(parse_json_response(response).await?, None)?;
            debug!(job_id = %job.id, status = %job.status, "job created");
            Ok::<_, GatewayError>(job)
        };

        let poll = |id: String| {
            let headers = headers.clone();
            async move { self.fetch(&id, headers).await }
        };

        let job = run_job(
            create,
            poll,
            |status: &String| self.api.is_terminal(status),
            &self.poll_policy,
            cancel,
        )
        .await?;

        let job = job.ensure_success(|status| self.api.is_success(status))?;
        Ok(job.payload)
    }

    async fn fetch(
        &self,
        id: &str,
        headers: HeaderMap,
    ) -> Result<PollableJob<String, Value>, GatewayError> {
        let url = self.endpoint(&self.api.status_path_for(id));
        let response = send_with_retry(
            || self.client.get(url.as_str()).headers(headers.clone()),
            self.retry_policy,
        )
        .await?;

        self.api.job_from(parse_json_response(response).await?, Some(id))
    }
}

use futures::future::join_all;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use runner_core::config::RunnerConfig;
use runner_core::error::RunnerError;
use runner_core::handle::{RunnerHandle, RunnerKind};
use runner_core::retry::{retry, RetryPolicy};
use runner_core::{Command, JobStatus, Runner};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Delegating runner: forwards commands to a peer instance over its HTTP
/// job API and mirrors the status the peer reports.
///
/// Peer endpoints, relative to the configured `url`:
/// `POST /api/jobs`, `GET /api/jobs/{id}`, `DELETE /api/jobs/{id}`.
pub struct DelegatingRunner {
    config: RunnerConfig,
    base_url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    args: &'a [String],
    cwd: &'a Path,
    env: BTreeMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

impl DelegatingRunner {
    pub fn new(config: RunnerConfig) -> Result<Self, RunnerError> {
        let base_url = config
            .url
            .as_deref()
            .ok_or_else(|| RunnerError::Http(format!("remote runner '{}' requires 'url'", config.name)))?
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RunnerError::Http(format!("Failed to build HTTP client: {}", e)))?;
        let retry = config.retry_policy();
        Ok(Self {
            config,
            base_url,
            client,
            retry,
        })
    }

    fn remote_id(handle: &RunnerHandle) -> Result<&str, RunnerError> {
        match handle {
            RunnerHandle::Remote { job_id } => Ok(job_id.as_str()),
            other => Err(RunnerError::foreign(other, RunnerKind::Remote)),
        }
    }

    fn job_url(&self, id: &str) -> String {
        format!("{}/api/jobs/{}", self.base_url, id)
    }

    fn transport_error(&self, e: reqwest::Error) -> RunnerError {
        if e.is_timeout() {
            RunnerError::Timeout(self.config.request_timeout())
        } else {
            RunnerError::Http(e.to_string())
        }
    }

    async fn fetch_status(&self, id: &str) -> Result<JobStatus, RunnerError> {
        let url = self.job_url(id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Peer does not know job {}", id);
            return Ok(JobStatus::Unknown);
        }
        if !status.is_success() {
            return Err(RunnerError::Http(format!("GET {} returned {}", url, status)));
        }
        let body: StatusResponse = response.json().await.map_err(|e| self.transport_error(e))?;
        Ok(parse_remote_status(&body.status))
    }

    async fn send_cancel(&self, id: &str) -> Result<(), RunnerError> {
        let url = self.job_url(id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(RunnerError::Http(format!("DELETE {} returned {}", url, status)))
        }
    }
}

/// Client errors that mean "try again later" rather than "bad request".
fn is_busy(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS
}

/// Peer status string to local status, case-insensitive.
///
/// Work the peer has not started yet is reported as queued; a job the peer
/// has purged or never heard of is unknown.
pub fn parse_remote_status(s: &str) -> JobStatus {
    match s.parse::<JobStatus>() {
        Ok(JobStatus::Pending | JobStatus::Accepted) => JobStatus::Queued,
        Ok(JobStatus::Deleted) => JobStatus::Unknown,
        Ok(status) => status,
        Err(e) => {
            warn!("Peer sent {}", e);
            JobStatus::Unknown
        }
    }
}

#[async_trait::async_trait]
impl Runner for DelegatingRunner {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> RunnerKind {
        RunnerKind::Remote
    }

    /// Not retried here: a lost response could otherwise start the job twice.
    async fn submit(&self, command: &Command, work_dir: &Path) -> Result<RunnerHandle, RunnerError> {
        command.validate().map_err(RunnerError::Submission)?;

        let env = self
            .config
            .env
            .iter()
            .chain(command.env())
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let request = SubmitRequest {
            args: command.args(),
            cwd: command.cwd(),
            env,
        };

        let url = format!("{}/api/jobs", self.base_url);
        debug!("POST {}: {}", url, command);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if is_busy(status) {
            let wait = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|v| format!(", retry after {}", v))
                .unwrap_or_default();
            return Err(RunnerError::Unavailable(format!(
                "peer busy ({}){}",
                status, wait
            )));
        }
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(RunnerError::Submission(format!(
                "peer refused job ({}): {}",
                status,
                text.trim()
            )));
        }
        if !status.is_success() {
            return Err(RunnerError::Unavailable(format!("POST {} returned {}", url, status)));
        }

        let body: SubmitResponse = response.json().await.map_err(|e| self.transport_error(e))?;
        info!(
            "Runner {} delegated job from {} as remote job {}",
            self.name(),
            work_dir.display(),
            body.id
        );
        Ok(RunnerHandle::Remote { job_id: body.id })
    }

    async fn cancel(&self, handle: &RunnerHandle) -> Result<(), RunnerError> {
        let id = Self::remote_id(handle)?;
        warn!("Cancelling remote job {} on {}", id, self.name());
        retry(&self.retry, "remote cancel", || self.send_cancel(id)).await
    }

    async fn batch_cancel(&self, handles: &[RunnerHandle]) -> Result<(), RunnerError> {
        let ids = handles
            .iter()
            .map(Self::remote_id)
            .collect::<Result<Vec<_>, _>>()?;
        let calls = ids.into_iter().map(|id| async move {
            warn!("Cancelling remote job {} on {}", id, self.name());
            retry(&self.retry, "remote cancel", || self.send_cancel(id)).await
        });
        join_all(calls).await.into_iter().collect()
    }

    /// Transport failures surface as transient errors once the retries are
    /// spent; the dispatcher decides when a silent peer has lost the job.
    async fn check_status(&self, handle: &RunnerHandle) -> Result<JobStatus, RunnerError> {
        let id = Self::remote_id(handle)?;
        retry(&self.retry, "remote status", || self.fetch_status(id))
            .await
            .inspect_err(|e| warn!("Status of remote job {} unavailable: {}", id, e))
    }

    async fn batch_check_status(
        &self,
        handles: &[RunnerHandle],
    ) -> Result<Vec<JobStatus>, RunnerError> {
        for handle in handles {
            Self::remote_id(handle)?;
        }
        join_all(handles.iter().map(|h| self.check_status(h)))
            .await
            .into_iter()
            .collect()
    }
}

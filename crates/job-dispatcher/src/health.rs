//! Runner health checks: push a small test command through a runner's
//! submit/start/check_status cycle and report how it came back.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use runner_core::{Command, JobStatus, Runner, RunnerError, RunnerHandle};
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Ok,
    Failed,
    Timeout,
    Interrupted,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Ok => write!(f, "ok"),
            HealthState::Failed => write!(f, "failed"),
            HealthState::Timeout => write!(f, "timeout"),
            HealthState::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub runner: String,
    pub state: HealthState,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.state == HealthState::Ok
    }
}

/// A test command and how long it may take to complete.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    command: Command,
    timeout: Duration,
    poll_interval: Duration,
}

impl HealthCheck {
    pub fn new(command: Command, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            poll_interval: Duration::from_millis(200),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Run the test command on `runner` with `work_dir` as its job directory.
    pub async fn run(&self, runner: &dyn Runner, work_dir: &Path) -> HealthReport {
        let (state, message) = self.exercise(runner, work_dir).await;
        match state {
            HealthState::Ok => info!("Runner {} healthy", runner.name()),
            _ => warn!("Runner {} health check {}: {}", runner.name(), state, message),
        }
        HealthReport {
            runner: runner.name().to_string(),
            state,
            message,
            checked_at: Utc::now(),
        }
    }

    async fn exercise(&self, runner: &dyn Runner, work_dir: &Path) -> (HealthState, String) {
        let deadline = Instant::now() + self.timeout;

        let handle = match until(deadline, self.timeout, runner.submit(&self.command, work_dir)).await {
            Ok(handle) => handle,
            Err(e) => return failure(e),
        };
        if let Err(e) = until(deadline, self.timeout, runner.start(&handle)).await {
            self.abandon(runner, &handle).await;
            return failure(e);
        }

        loop {
            match until(deadline, self.timeout, runner.check_status(&handle)).await {
                Ok(JobStatus::Completed) => return (HealthState::Ok, String::new()),
                Ok(JobStatus::Failed | JobStatus::Error | JobStatus::Rejected) => {
                    return (HealthState::Failed, "completed unsuccessfully".into())
                }
                Ok(JobStatus::Interrupted | JobStatus::Deleted) => {
                    return (
                        HealthState::Interrupted,
                        "removed from the scheduling system".into(),
                    )
                }
                Ok(JobStatus::Unknown) => {
                    return (HealthState::Failed, "runner lost track of the test job".into())
                }
                Ok(status) => debug!("Health check on {}: {}", runner.name(), status),
                Err(RunnerError::Timeout(_)) => break,
                Err(e) => {
                    self.abandon(runner, &handle).await;
                    return failure(e);
                }
            }
            if Instant::now() + self.poll_interval >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        self.abandon(runner, &handle).await;
        (HealthState::Timeout, "timeout".into())
    }

    /// Best-effort cancel of a test job that will not be watched any more.
    async fn abandon(&self, runner: &dyn Runner, handle: &RunnerHandle) {
        match tokio::time::timeout(self.timeout, runner.cancel(handle)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Could not cancel health check job {}: {}", handle, e),
            Err(_) => warn!("Cancelling health check job {} timed out", handle),
        }
    }
}

fn failure(e: RunnerError) -> (HealthState, String) {
    match e {
        RunnerError::Timeout(_) => (HealthState::Timeout, "timeout".into()),
        other => (HealthState::Failed, other.to_string()),
    }
}

async fn until<T>(
    deadline: Instant,
    limit: Duration,
    call: impl Future<Output = Result<T, RunnerError>>,
) -> Result<T, RunnerError> {
    tokio::time::timeout_at(deadline, call)
        .await
        .unwrap_or(Err(RunnerError::Timeout(limit)))
}

/// Check every runner concurrently, each in its own fresh directory under
/// `scratch`. Reports come back in input order.
pub async fn check_all(
    checks: &[(Arc<dyn Runner>, HealthCheck)],
    scratch: &Path,
) -> Vec<HealthReport> {
    let runs = checks.iter().map(|(runner, check)| async move {
        let work_dir = scratch.join(runner.name());
        if let Err(e) = reset_dir(&work_dir).await {
            return HealthReport {
                runner: runner.name().to_string(),
                state: HealthState::Failed,
                message: format!("cannot prepare {}: {}", work_dir.display(), e),
                checked_at: Utc::now(),
            };
        }
        check.run(runner.as_ref(), &work_dir).await
    });
    join_all(runs).await
}

async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

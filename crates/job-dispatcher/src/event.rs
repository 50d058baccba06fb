use chrono::{DateTime, Utc};
use runner_core::{JobId, JobStatus};
use std::fmt;

/// One applied status change. `from` is `None` when the job was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub runner: String,
    pub from: Option<JobStatus>,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.from {
            Some(from) => write!(f, "{} [{}] {} -> {}", self.job_id, self.runner, from, self.to),
            None => write!(f, "{} [{}] created as {}", self.job_id, self.runner, self.to),
        }
    }
}

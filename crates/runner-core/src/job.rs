use crate::command::Command;
use crate::handle::RunnerHandle;
use crate::status::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// One in-flight execution of a [`Command`].
///
/// `work_dir` is the job's private directory (captured output, submission
/// scripts, exit markers); `command.cwd` is where the program itself runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub work_dir: PathBuf,
    pub command: Command,
    pub runner: String,
    pub status: JobStatus,
    pub handle: Option<RunnerHandle>,
    #[serde(default)]
    pub started: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, work_dir: PathBuf, command: Command, runner: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            work_dir,
            command,
            runner,
            status: JobStatus::Pending,
            handle: None,
            started: false,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns the previous status on success, `None` when the transition
    /// was refused and nothing changed.
    pub fn advance(&mut self, next: JobStatus) -> Option<JobStatus> {
        if !self.status.can_transition_to(next) {
            return None;
        }
        let prev = self.status;
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(now);
        }
        Some(prev)
    }

    pub fn mark_accepted(&mut self, handle: RunnerHandle) -> Option<JobStatus> {
        let prev = self.advance(JobStatus::Accepted)?;
        self.handle = Some(handle);
        Some(prev)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            JobId::new(),
            PathBuf::from("/tmp/job"),
            Command::new(["echo", "hi"]),
            "local".into(),
        )
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.handle.is_none());
        assert!(!job.started);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_accept_records_handle() {
        let mut job = job();
        let prev = job.mark_accepted(RunnerHandle::Local { seq: 42, pid: 42 });
        assert_eq!(prev, Some(JobStatus::Pending));
        assert_eq!(job.handle, Some(RunnerHandle::Local { seq: 42, pid: 42 }));
    }

    #[test]
    fn test_terminal_sets_finished_at_and_freezes() {
        let mut job = job();
        job.mark_accepted(RunnerHandle::Local { seq: 1, pid: 1 });
        assert!(job.advance(JobStatus::Running).is_some());
        assert!(job.advance(JobStatus::Completed).is_some());
        assert!(job.finished_at.is_some());
        assert!(job.advance(JobStatus::Running).is_none());
        assert!(job.advance(JobStatus::Failed).is_none());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_refused_accept_keeps_handle_empty() {
        let mut job = job();
        job.advance(JobStatus::Rejected);
        assert!(job.mark_accepted(RunnerHandle::Local { seq: 7, pid: 7 }).is_none());
        assert!(job.handle.is_none());
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical job lifecycle shared by every runner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Accepted,
    Queued,
    Running,
    Cancelling,
    Completed,
    Failed,
    Error,
    Interrupted,
    Deleted,
    Rejected,
    Unknown,
}

impl JobStatus {
    pub const ALL: [JobStatus; 12] = [
        JobStatus::Pending,
        JobStatus::Accepted,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Cancelling,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Error,
        JobStatus::Interrupted,
        JobStatus::Deleted,
        JobStatus::Rejected,
        JobStatus::Unknown,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Error
                | JobStatus::Interrupted
                | JobStatus::Deleted
                | JobStatus::Rejected
                | JobStatus::Unknown
        )
    }

    /// Queued or running on a backend; the states cancellation acts on.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// Outcomes a backend may report for work it has executed.
    fn is_outcome(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Error
                | JobStatus::Interrupted
                | JobStatus::Unknown
        )
    }

    /// Whether `next` is a legal forward edge from `self`.
    ///
    /// Terminal states are frozen; the single exception is the retention
    /// purge, which moves a finished job to `Deleted`. A cancelling job ends
    /// interrupted unless it finished on its own before the cancel landed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (*self, next) {
            (Deleted, _) => false,
            (s, Deleted) => s.is_terminal(),
            (Pending, Accepted | Rejected | Interrupted | Error) => true,
            (Accepted, Queued | Running | Rejected) => true,
            (Accepted, n) => n.is_outcome(),
            (Queued, Running | Cancelling) => true,
            (Queued, n) => n.is_outcome(),
            (Running, Cancelling) => true,
            (Running, n) => n.is_outcome(),
            (Cancelling, Interrupted | Completed | Failed | Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Accepted => "accepted",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Interrupted => "interrupted",
            JobStatus::Deleted => "deleted",
            JobStatus::Rejected => "rejected",
            JobStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        JobStatus::ALL
            .into_iter()
            .find(|st| st.to_string() == lowered)
            .ok_or_else(|| format!("unrecognized job status '{}'", s))
    }
}

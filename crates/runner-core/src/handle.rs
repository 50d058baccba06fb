use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Backend kinds a runner can be.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    Local,
    Cluster,
    Remote,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKind::Local => write!(f, "local"),
            RunnerKind::Cluster => write!(f, "cluster"),
            RunnerKind::Remote => write!(f, "remote"),
        }
    }
}

/// Reference to a unit of work as known by the runner that created it.
///
/// The dispatcher stores handles and passes them back untouched; only the
/// owning runner looks inside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerHandle {
    /// `seq` is unique per runner instance; `pid` is informational since the
    /// OS may hand it to a later process.
    Local { seq: u64, pid: u32 },
    Cluster { job_id: String, work_dir: PathBuf },
    Remote { job_id: String },
}

impl RunnerHandle {
    pub fn kind(&self) -> RunnerKind {
        match self {
            RunnerHandle::Local { .. } => RunnerKind::Local,
            RunnerHandle::Cluster { .. } => RunnerKind::Cluster,
            RunnerHandle::Remote { .. } => RunnerKind::Remote,
        }
    }
}

impl fmt::Display for RunnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerHandle::Local { pid, .. } => write!(f, "local:{}", pid),
            RunnerHandle::Cluster { job_id, .. } => write!(f, "cluster:{}", job_id),
            RunnerHandle::Remote { job_id } => write!(f, "remote:{}", job_id),
        }
    }
}

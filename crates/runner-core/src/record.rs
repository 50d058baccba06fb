use crate::job::{Job, JobId};
use crate::status::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const RECORD_FILE: &str = "job.json";

/// Snapshot of a job stored as job.json inside its working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub runner: String,
    pub status: JobStatus,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub work_dir: PathBuf,
    pub handle: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            runner: job.runner.clone(),
            status: job.status,
            args: job.command.args().to_vec(),
            cwd: job.command.cwd().to_path_buf(),
            work_dir: job.work_dir.clone(),
            handle: job.handle.as_ref().map(|h| h.to_string()),
            created_at: job.created_at,
            updated_at: job.updated_at,
            finished_at: job.finished_at,
        }
    }

    /// Write the record to job.json in the given directory.
    pub fn write_to_dir(&self, dir: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(dir.join(RECORD_FILE), json)
    }

    pub fn read_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Record of job `id` stored under `jobs_dir`.
    pub fn load(jobs_dir: &Path, id: &JobId) -> Result<Self, std::io::Error> {
        Self::read_from_file(&jobs_dir.join(&id.0).join(RECORD_FILE))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "job_id": self.job_id.0,
            "runner": self.runner,
            "status": self.status,
            "args": self.args,
            "cwd": self.cwd,
            "work_dir": self.work_dir,
            "handle": self.handle,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
            "finished_at": self.finished_at.map(|t| t.to_rfc3339()),
        })
    }
}

/// All job records under `jobs_dir`, newest first. Unreadable entries are skipped.
pub fn list_records(jobs_dir: &Path) -> Result<Vec<JobRecord>, std::io::Error> {
    if !jobs_dir.exists() {
        return Ok(Vec::new());
    }
    let mut results = Vec::new();
    for entry in std::fs::read_dir(jobs_dir)? {
        let path = entry?.path().join(RECORD_FILE);
        if path.is_file() {
            if let Ok(record) = JobRecord::read_from_file(&path) {
                results.push(record);
            }
        }
    }
    results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(results)
}

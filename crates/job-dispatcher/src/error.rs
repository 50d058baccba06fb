use runner_core::{JobId, JobStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Runner not found: {0}")]
    UnknownRunner(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {id} is still {status}")]
    NotTerminal { id: JobId, status: JobStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

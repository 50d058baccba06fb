use crate::handle::{RunnerHandle, RunnerKind};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// The backend refused the command outright. Never retried.
    #[error("Submission rejected: {0}")]
    Submission(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Runner call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handle {handle} does not belong to a {expected} runner")]
    ForeignHandle {
        handle: RunnerHandle,
        expected: RunnerKind,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl RunnerError {
    /// Transient errors leave the job untouched and are retried later.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            RunnerError::Submission(_) | RunnerError::ForeignHandle { .. }
        )
    }

    pub fn foreign(handle: &RunnerHandle, expected: RunnerKind) -> Self {
        RunnerError::ForeignHandle {
            handle: handle.clone(),
            expected,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

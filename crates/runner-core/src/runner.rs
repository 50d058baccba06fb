use crate::command::Command;
use crate::error::RunnerError;
use crate::handle::{RunnerHandle, RunnerKind};
use crate::status::JobStatus;
use std::path::{Path, PathBuf};

/// A command paired with the private directory of the job that runs it.
pub type Submission = (Command, PathBuf);

/// Core runner trait. Every execution backend implements this.
///
/// Only `submit`, `check_status` and `cancel` are required. The batch forms
/// default to calling the single forms in order; backends with a high fixed
/// cost per call override them.
#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    /// Name of this runner instance (from config).
    fn name(&self) -> &str;

    fn kind(&self) -> RunnerKind;

    /// Register `command` with the backend. Output artifacts go to `work_dir`.
    async fn submit(&self, command: &Command, work_dir: &Path) -> Result<RunnerHandle, RunnerError>;

    /// Submit several commands. The result has one entry per input, in order.
    async fn batch_submit(
        &self,
        submissions: &[Submission],
    ) -> Vec<Result<RunnerHandle, RunnerError>> {
        let mut results = Vec::with_capacity(submissions.len());
        for (command, work_dir) in submissions {
            results.push(self.submit(command, work_dir).await);
        }
        results
    }

    /// Release submitted work for execution. Backends that start on submit
    /// keep the default no-op.
    async fn start(&self, handle: &RunnerHandle) -> Result<(), RunnerError> {
        let _ = handle;
        Ok(())
    }

    async fn batch_start(&self, handles: &[RunnerHandle]) -> Result<(), RunnerError> {
        for handle in handles {
            self.start(handle).await?;
        }
        Ok(())
    }

    /// Ask the backend to stop the work. Must be a no-op for finished or
    /// unknown handles.
    async fn cancel(&self, handle: &RunnerHandle) -> Result<(), RunnerError>;

    async fn batch_cancel(&self, handles: &[RunnerHandle]) -> Result<(), RunnerError> {
        for handle in handles {
            self.cancel(handle).await?;
        }
        Ok(())
    }

    /// Current status of the work. `Unknown` when the backend has lost it.
    async fn check_status(&self, handle: &RunnerHandle) -> Result<JobStatus, RunnerError>;

    async fn batch_check_status(
        &self,
        handles: &[RunnerHandle],
    ) -> Result<Vec<JobStatus>, RunnerError> {
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(self.check_status(handle).await?);
        }
        Ok(statuses)
    }
}

pub mod command;
pub mod config;
pub mod error;
pub mod handle;
pub mod job;
pub mod record;
pub mod retry;
pub mod runner;
pub mod status;

pub use command::Command;
pub use config::{Config, DispatcherSettings, RunnerConfig};
pub use error::{ConfigError, RunnerError};
pub use handle::{RunnerHandle, RunnerKind};
pub use job::{Job, JobId};
pub use record::JobRecord;
pub use retry::{BackoffCounter, RetryPolicy};
pub use runner::{Runner, Submission};
pub use status::JobStatus;

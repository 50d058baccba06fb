//! Dispatcher: admits jobs to runners, polls their status in batches, and
//! turns cancellation requests into runner calls.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod health;

pub use dispatcher::{CancelHandle, Dispatcher, RunnerInfo};
pub use error::DispatchError;
pub use event::StatusEvent;
pub use health::{check_all, HealthCheck, HealthReport, HealthState};

//! Retry and backoff helpers shared by runners and the dispatcher.

use crate::error::RunnerError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded exponential retry for transient backend errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the retry following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
/// The last error is returned when every attempt failed.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, RunnerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RunnerError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                debug!("{} failed (attempt {}/{}): {}; retrying in {:?}", what, attempt, attempts, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Tracks consecutive failures of a repeated operation.
///
/// After the n-th failure in a row the operation is skipped for `2^n - 1`
/// rounds (at most `max_skip`). A success resets the counter.
#[derive(Debug, Clone)]
pub struct BackoffCounter {
    failures: u32,
    skip_remaining: u64,
    max_tries: u32,
    max_skip: u64,
}

impl BackoffCounter {
    pub fn new(max_tries: u32) -> Self {
        Self {
            failures: 0,
            skip_remaining: 0,
            max_tries,
            max_skip: 64,
        }
    }

    /// Returns true when this round should run the operation.
    pub fn ready(&mut self) -> bool {
        if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            false
        } else {
            true
        }
    }

    pub fn failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        let skip = (1u64 << self.failures.min(32)) - 1;
        self.skip_remaining = skip.min(self.max_skip);
    }

    pub fn success(&mut self) {
        self.failures = 0;
        self.skip_remaining = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether the failure limit has been reached.
    pub fn give_up(&self) -> bool {
        self.failures >= self.max_tries
    }
}

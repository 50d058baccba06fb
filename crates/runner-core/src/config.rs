use crate::error::ConfigError;
use crate::handle::RunnerKind;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
/// Loaded from ~/.config/slivka/dispatch.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub runners: Vec<RunnerConfig>,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub runner_type: RunnerKind,
    /// Concurrency ceiling: jobs admitted but not yet finished.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Extra environment applied to every command of this runner.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Test command for `runners --check`, default `true`.
    #[serde(default)]
    pub health_command: Option<Vec<String>>,
    #[serde(default)]
    pub health_timeout_ms: Option<u64>,

    // local
    #[serde(default)]
    pub grace_period_ms: Option<u64>,

    // cluster
    #[serde(default)]
    pub submit_command: Option<String>,
    #[serde(default)]
    pub status_command: Option<String>,
    #[serde(default)]
    pub cancel_command: Option<String>,
    #[serde(default)]
    pub submit_args: Vec<String>,

    // remote
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,
    /// Consecutive failed submission rounds before waiting jobs become `error`.
    #[serde(default = "default_max_failures")]
    pub max_submit_failures: u32,
    /// Consecutive failed status rounds before a runner's jobs become `unknown`.
    #[serde(default = "default_max_failures")]
    pub max_check_failures: u32,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            jobs_dir: default_jobs_dir(),
            max_submit_failures: default_max_failures(),
            max_check_failures: default_max_failures(),
        }
    }
}

impl DispatcherSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_limit() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_max_failures() -> u32 {
    10
}

fn default_jobs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("slivka")
        .join("jobs")
}

impl Config {
    /// Load config from the default path (~/.config/slivka/dispatch.yaml).
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::local_only())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("slivka")
            .join("dispatch.yaml")
    }

    /// Config with a single local runner, used when no file exists.
    pub fn local_only() -> Self {
        Self {
            runners: vec![RunnerConfig::new("local", RunnerKind::Local)],
            dispatcher: DispatcherSettings::default(),
        }
    }

    /// Find a runner config by name.
    pub fn find_runner(&self, name: &str) -> Option<&RunnerConfig> {
        self.runners.iter().find(|r| r.name == name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for runner in &self.runners {
            if !seen.insert(runner.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate runner name '{}'",
                    runner.name
                )));
            }
            if runner.limit == 0 {
                return Err(ConfigError::Invalid(format!(
                    "runner '{}' has a limit of 0",
                    runner.name
                )));
            }
            if runner.runner_type == RunnerKind::Remote && runner.url.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "remote runner '{}' requires 'url'",
                    runner.name
                )));
            }
        }
        Ok(())
    }
}

impl RunnerConfig {
    pub fn new(name: impl Into<String>, runner_type: RunnerKind) -> Self {
        Self {
            name: name.into(),
            runner_type,
            limit: default_limit(),
            env: BTreeMap::new(),
            health_command: None,
            health_timeout_ms: None,
            grace_period_ms: None,
            submit_command: None,
            status_command: None,
            cancel_command: None,
            submit_args: Vec::new(),
            url: None,
            request_timeout_ms: None,
            retry: None,
        }
    }

    /// Grace period between SIGINT and SIGKILL, falling back to 5s.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms.unwrap_or(5_000))
    }

    pub fn submit_binary(&self) -> &str {
        self.submit_command.as_deref().unwrap_or("qsub")
    }

    pub fn status_binary(&self) -> &str {
        self.status_command.as_deref().unwrap_or("qstat")
    }

    pub fn cancel_binary(&self) -> &str {
        self.cancel_command.as_deref().unwrap_or("qdel")
    }

    /// Per-request timeout for remote calls, falling back to 10s.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(10_000))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.unwrap_or_default()
    }

    pub fn health_args(&self) -> Vec<String> {
        match &self.health_command {
            Some(args) if !args.is_empty() => args.clone(),
            _ => vec!["true".to_string()],
        }
    }

    /// How long a health check job may take, falling back to 60s.
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms.unwrap_or(60_000))
    }
}

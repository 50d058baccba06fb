use futures::future::join_all;
use runner_core::config::RunnerConfig;
use runner_core::error::RunnerError;
use runner_core::handle::{RunnerHandle, RunnerKind};
use runner_core::{Command, JobStatus, Runner};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

enum Proc {
    Running { child: Child, pid: u32 },
    Exited(ExitStatus),
}

/// Local runner: spawns commands as child processes of the dispatcher.
///
/// Children are tracked in memory under a per-runner sequence number, so
/// handles do not survive a restart and a reused pid never aliases an older
/// job. A handle this runner did not issue reports `unknown`.
pub struct LocalRunner {
    config: RunnerConfig,
    procs: Mutex<HashMap<u64, Proc>>,
    next_seq: AtomicU64,
}

impl LocalRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            procs: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    fn grace_period(&self) -> Duration {
        self.config.grace_period()
    }

    fn seq_of(handle: &RunnerHandle) -> Result<u64, RunnerError> {
        match handle {
            RunnerHandle::Local { seq, .. } => Ok(*seq),
            other => Err(RunnerError::foreign(other, RunnerKind::Local)),
        }
    }
}

pub fn stdout_path(work_dir: &Path) -> PathBuf {
    work_dir.join("stdout")
}

pub fn stderr_path(work_dir: &Path) -> PathBuf {
    work_dir.join("stderr")
}

/// Last `lines` lines of a captured output file; empty if it does not exist.
pub fn tail_log(path: &Path, lines: usize) -> Result<Vec<String>, std::io::Error> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let all: Vec<&str> = text.lines().collect();
    let skip = all.len().saturating_sub(lines);
    Ok(all[skip..].iter().map(|l| l.to_string()).collect())
}

fn exit_to_status(status: ExitStatus) -> JobStatus {
    match status.code() {
        Some(0) => JobStatus::Completed,
        Some(_) => JobStatus::Failed,
        // no exit code: terminated by a signal
        None => JobStatus::Interrupted,
    }
}

async fn send_interrupt(pid: u32) {
    let result = tokio::process::Command::new("kill")
        .args(["-INT", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = result {
        warn!("Failed to send SIGINT to {}: {}", pid, e);
    }
}

#[async_trait::async_trait]
impl Runner for LocalRunner {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> RunnerKind {
        RunnerKind::Local
    }

    async fn submit(&self, command: &Command, work_dir: &Path) -> Result<RunnerHandle, RunnerError> {
        command.validate().map_err(RunnerError::Submission)?;
        let args = command.args();

        tokio::fs::create_dir_all(work_dir).await?;
        let stdout = std::fs::File::create(stdout_path(work_dir))?;
        let stderr = std::fs::File::create(stderr_path(work_dir))?;

        debug!("Local exec in {}: {}", command.cwd().display(), command);

        let child = tokio::process::Command::new(&args[0])
            .args(&args[1..])
            .current_dir(command.cwd())
            .envs(&self.config.env)
            .envs(command.env())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => RunnerError::Submission(
                    format!("cannot execute '{}' in {}: {}", args[0], command.cwd().display(), e),
                ),
                _ => RunnerError::Io(e),
            })?;

        let pid = child
            .id()
            .ok_or_else(|| RunnerError::Unavailable("child exited before reporting a pid".into()))?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        info!("Runner {} started '{}' with PID {}", self.name(), args[0], pid);
        self.procs.lock().await.insert(seq, Proc::Running { child, pid });
        Ok(RunnerHandle::Local { seq, pid })
    }

    async fn cancel(&self, handle: &RunnerHandle) -> Result<(), RunnerError> {
        self.batch_cancel(std::slice::from_ref(handle)).await
    }

    /// SIGINT everything first, then give each process the grace period to
    /// exit before SIGKILL. Children stay in the table throughout, so a caller
    /// that stops waiting early does not lose track of them.
    async fn batch_cancel(&self, handles: &[RunnerHandle]) -> Result<(), RunnerError> {
        let seqs = handles
            .iter()
            .map(Self::seq_of)
            .collect::<Result<Vec<_>, _>>()?;

        let mut procs = self.procs.lock().await;
        let mut targets = HashSet::new();
        for seq in seqs {
            let polled = match procs.get_mut(&seq) {
                Some(Proc::Running { child, pid }) => (*pid, child.try_wait()),
                _ => {
                    debug!("Local job {} is not running, nothing to cancel", seq);
                    continue;
                }
            };
            match polled {
                (_, Ok(Some(status))) => {
                    procs.insert(seq, Proc::Exited(status));
                }
                (pid, Ok(None)) => {
                    warn!("Interrupting local process {}", pid);
                    send_interrupt(pid).await;
                    targets.insert(seq);
                }
                (pid, Err(e)) => {
                    debug!("try_wait on {} failed ({}), treating as alive", pid, e);
                    send_interrupt(pid).await;
                    targets.insert(seq);
                }
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let grace = self.grace_period();
        let waits = procs.iter_mut().filter_map(|(seq, entry)| match entry {
            Proc::Running { child, pid } if targets.contains(seq) => {
                let (seq, pid) = (*seq, *pid);
                Some(async move {
                    let status = match tokio::time::timeout(grace, child.wait()).await {
                        Ok(Ok(status)) => Some(status),
                        _ => {
                            warn!("PID {} still alive after {:?}, killing", pid, grace);
                            if let Err(e) = child.kill().await {
                                warn!("Failed to kill {}: {}", pid, e);
                            }
                            child.try_wait().ok().flatten()
                        }
                    };
                    (seq, status)
                })
            }
            _ => None,
        });
        let exited: Vec<(u64, Option<ExitStatus>)> = join_all(waits).await;

        for (seq, status) in exited {
            if let Some(status) = status {
                procs.insert(seq, Proc::Exited(status));
            }
        }
        Ok(())
    }

    async fn check_status(&self, handle: &RunnerHandle) -> Result<JobStatus, RunnerError> {
        let seq = Self::seq_of(handle)?;
        let mut procs = self.procs.lock().await;
        let Some(entry) = procs.get_mut(&seq) else {
            return Ok(JobStatus::Unknown);
        };
        let status = match entry {
            Proc::Exited(status) => *status,
            Proc::Running { child, .. } => match child.try_wait()? {
                None => return Ok(JobStatus::Running),
                Some(status) => status,
            },
        };
        *entry = Proc::Exited(status);
        Ok(exit_to_status(status))
    }
}

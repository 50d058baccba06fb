use futures::future::join_all;
use runner_core::command::shell_escape;
use runner_core::config::RunnerConfig;
use runner_core::error::RunnerError;
use runner_core::handle::{RunnerHandle, RunnerKind};
use runner_core::runner::Submission;
use runner_core::{Command, JobStatus, Runner};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Maximum number of concurrent qsub invocations in one batch.
const QSUB_LIMIT: usize = 100;

/// File the submission script writes the command's exit code to.
pub const FINISHED_FILE: &str = "finished";

/// Outcome of a qsub invocation, kept until a `submit` call collects it.
enum QsubState {
    InFlight,
    Done(Result<String, RunnerError>),
}

/// Grid Engine runner: submits through `qsub`, polls `qstat`, cancels
/// with `qdel`. The queue decides when work starts, so `start` is a no-op.
///
/// qsub runs in a detached task keyed by the job's work dir. A `submit`
/// abandoned mid-call (for instance by a caller's timeout) leaves its result
/// behind for the next `submit` of the same work dir instead of queueing the
/// job a second time.
pub struct GridEngineRunner {
    config: RunnerConfig,
    submissions: Arc<Mutex<HashMap<PathBuf, QsubState>>>,
}

impl GridEngineRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            submissions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn native_id(handle: &RunnerHandle) -> Result<(&str, &Path), RunnerError> {
        match handle {
            RunnerHandle::Cluster { job_id, work_dir } => Ok((job_id.as_str(), work_dir.as_path())),
            other => Err(RunnerError::foreign(other, RunnerKind::Cluster)),
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        self.config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn handle(&self, job_id: String, work_dir: &Path) -> RunnerHandle {
        info!("Runner {} submitted grid engine job {} from {}", self.name(), job_id, work_dir.display());
        RunnerHandle::Cluster {
            job_id,
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// What an earlier qsub for `work_dir` left behind, if anything.
    async fn earlier_result(&self, work_dir: &Path) -> Option<Result<String, RunnerError>> {
        let mut submissions = self.submissions.lock().await;
        match submissions.remove(work_dir) {
            Some(QsubState::Done(result)) => {
                debug!("Collected earlier qsub result for {}", work_dir.display());
                Some(result)
            }
            Some(QsubState::InFlight) => {
                submissions.insert(work_dir.to_path_buf(), QsubState::InFlight);
                Some(Err(RunnerError::Unavailable(format!(
                    "earlier qsub for {} has not returned yet",
                    work_dir.display()
                ))))
            }
            None => None,
        }
    }
}

/// Run a queue command and return its output. Failing to launch the
/// binary at all means the queue is unavailable.
async fn run_cmd(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    env: &[(String, String)],
) -> Result<Output, RunnerError> {
    debug!("Running: {} {}", program, args.join(" "));
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .envs(env.iter().map(|(k, v)| (k, v)))
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.output()
        .await
        .map_err(|e| RunnerError::Unavailable(format!("Failed to run {}: {}", program, e)))
}

/// Invoke qsub and extract the native job id.
async fn qsub(
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
    env: Vec<(String, String)>,
) -> Result<String, RunnerError> {
    let output = run_cmd(&program, &args, Some(&work_dir), &env).await?;
    if !output.status.success() {
        return Err(RunnerError::Submission(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            combined_output(&output).trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_submitted(&stdout).ok_or_else(|| {
        RunnerError::Submission(format!("Unrecognized {} output: {}", program, stdout.trim()))
    })
}

/// Shell script wrapping `command`; records the exit code in `finished`
/// inside the directory the queue starts it in.
pub fn submission_script(command: &Command) -> String {
    let mut script = String::from("#!/bin/sh\njob_dir=\"$(pwd)\"\n");
    script.push_str(&format!(
        "cd {} || {{ echo 127 > \"$job_dir/{}\"; exit 127; }}\n",
        shell_escape(&command.cwd().to_string_lossy()),
        FINISHED_FILE
    ));
    for (key, value) in command.env() {
        if is_identifier(key) {
            script.push_str(&format!("export {}={}\n", key, shell_escape(value)));
        } else {
            warn!("Skipping invalid environment variable name '{}'", key);
        }
    }
    script.push_str(&command.shell_line());
    script.push('\n');
    script.push_str(&format!("echo $? > \"$job_dir/{}\"\n", FINISHED_FILE));
    script
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Extract the job id from `Your job 123 ("name") has been submitted`.
pub fn parse_submitted(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Your job ")?;
        if !rest.contains("has been submitted") {
            return None;
        }
        let id = rest.split_whitespace().next()?;
        id.chars()
            .all(|c| c.is_ascii_digit())
            .then(|| id.to_string())
    })
}

/// Map of job id to state letters from plain `qstat` output.
///
/// Rows look like `job-ID prior name user state submit/start-at queue ...`;
/// the header and separator lines are skipped.
pub fn parse_qstat(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            let numeric = !fields[0].is_empty() && fields[0].chars().all(|c| c.is_ascii_digit());
            if !numeric || !fields[1].contains('.') {
                return None;
            }
            Some((fields[0].to_string(), fields[4].to_string()))
        })
        .collect()
}

/// Grid Engine state letters to job status.
pub fn map_state(letters: &str) -> JobStatus {
    match letters {
        "qw" | "hqw" | "hRwq" | "Rq" => JobStatus::Queued,
        "r" | "t" | "Rr" | "Rt" | "s" | "ts" | "S" => JobStatus::Running,
        "d" | "dr" | "dt" => JobStatus::Cancelling,
        "E" | "Eqw" => JobStatus::Error,
        other => {
            warn!("Unrecognized grid engine state '{}'", other);
            JobStatus::Unknown
        }
    }
}

/// Status of a job that no longer appears in qstat, from its exit marker.
pub async fn finished_status(work_dir: &Path) -> JobStatus {
    let path = work_dir.join(FINISHED_FILE);
    let code = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text.trim().parse::<i32>().ok(),
        Err(_) => None,
    };
    match code {
        Some(0) => JobStatus::Completed,
        Some(127) => JobStatus::Error,
        Some(c) if c >= 128 || c < 0 => JobStatus::Interrupted,
        Some(_) => JobStatus::Failed,
        None => {
            debug!("No usable exit marker at {}", path.display());
            JobStatus::Unknown
        }
    }
}

fn combined_output(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[async_trait::async_trait]
impl Runner for GridEngineRunner {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> RunnerKind {
        RunnerKind::Cluster
    }

    async fn submit(&self, command: &Command, work_dir: &Path) -> Result<RunnerHandle, RunnerError> {
        command.validate().map_err(RunnerError::Submission)?;
        if let Some(earlier) = self.earlier_result(work_dir).await {
            return earlier.map(|job_id| self.handle(job_id, work_dir));
        }

        let script_name = format!("run_{}.sh", uuid::Uuid::new_v4().simple());
        tokio::fs::create_dir_all(work_dir).await?;
        tokio::fs::write(work_dir.join(&script_name), submission_script(command)).await?;

        let mut args: Vec<String> = ["-V", "-cwd", "-o", "stdout", "-e", "stderr"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.config.submit_args.iter().cloned());
        args.push(script_name);
        let env: Vec<(String, String)> = self
            .config
            .env
            .iter()
            .chain(command.env())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let program = self.config.submit_binary().to_string();
        let dir = work_dir.to_path_buf();
        let submissions = self.submissions.clone();
        // the marker is set only once a task is certain to follow it
        self.submissions
            .lock()
            .await
            .insert(dir.clone(), QsubState::InFlight);
        let task = tokio::spawn(async move {
            let result = qsub(program, args, dir.clone(), env).await;
            submissions.lock().await.insert(dir, QsubState::Done(result));
        });
        if let Err(e) = task.await {
            self.submissions.lock().await.remove(work_dir);
            return Err(RunnerError::Unavailable(format!("qsub task failed: {}", e)));
        }

        match self.submissions.lock().await.remove(work_dir) {
            Some(QsubState::Done(result)) => result.map(|job_id| self.handle(job_id, work_dir)),
            _ => Err(RunnerError::Unavailable("qsub result went missing".into())),
        }
    }

    async fn batch_submit(
        &self,
        submissions: &[Submission],
    ) -> Vec<Result<RunnerHandle, RunnerError>> {
        let mut results = Vec::with_capacity(submissions.len());
        for chunk in submissions.chunks(QSUB_LIMIT) {
            let calls = chunk
                .iter()
                .map(|(command, work_dir)| self.submit(command, work_dir));
            results.extend(join_all(calls).await);
        }
        results
    }

    async fn cancel(&self, handle: &RunnerHandle) -> Result<(), RunnerError> {
        self.batch_cancel(std::slice::from_ref(handle)).await
    }

    async fn batch_cancel(&self, handles: &[RunnerHandle]) -> Result<(), RunnerError> {
        let ids = handles
            .iter()
            .map(|h| Self::native_id(h).map(|(id, _)| id.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        if ids.is_empty() {
            return Ok(());
        }

        warn!("Cancelling grid engine jobs {}", ids.join(" "));
        let qdel = self.config.cancel_binary();
        let output = run_cmd(qdel, &ids, None, &self.env()).await?;
        if output.status.success() {
            return Ok(());
        }

        let text = combined_output(&output);
        if text.contains("does not exist") {
            // already gone from the queue
            debug!("{} reported missing jobs: {}", qdel, text.trim());
            Ok(())
        } else {
            Err(RunnerError::Unavailable(format!(
                "{} exited with {}: {}",
                qdel,
                output.status,
                text.trim()
            )))
        }
    }

    async fn check_status(&self, handle: &RunnerHandle) -> Result<JobStatus, RunnerError> {
        let mut statuses = self.batch_check_status(std::slice::from_ref(handle)).await?;
        statuses
            .pop()
            .ok_or_else(|| RunnerError::Unavailable("empty status response".into()))
    }

    /// One qstat call for the whole batch.
    async fn batch_check_status(
        &self,
        handles: &[RunnerHandle],
    ) -> Result<Vec<JobStatus>, RunnerError> {
        let jobs = handles
            .iter()
            .map(Self::native_id)
            .collect::<Result<Vec<_>, _>>()?;
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let qstat = self.config.status_binary();
        let output = run_cmd(qstat, &[], None, &self.env()).await?;
        if !output.status.success() {
            return Err(RunnerError::Unavailable(format!(
                "{} exited with {}: {}",
                qstat,
                output.status,
                combined_output(&output).trim()
            )));
        }
        let states = parse_qstat(&String::from_utf8_lossy(&output.stdout));

        let mut statuses = Vec::with_capacity(jobs.len());
        for (job_id, work_dir) in jobs {
            let status = match states.get(job_id) {
                Some(letters) => map_state(letters),
                None => finished_status(work_dir).await,
            };
            statuses.push(status);
        }
        Ok(statuses)
    }
}

use job_dispatcher::{check_all, Dispatcher, HealthCheck, HealthReport, StatusEvent};
use runner_core::config::{Config, RunnerConfig};
use runner_core::error::RunnerError;
use runner_core::handle::RunnerKind;
use runner_core::{Command, JobRecord, Runner};
use runner_cluster::GridEngineRunner;
use runner_local::LocalRunner;
use runner_remote::DelegatingRunner;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

/// Create a runner from its config entry.
pub fn create_runner(config: &RunnerConfig) -> Result<Arc<dyn Runner>, RunnerError> {
    match config.runner_type {
        RunnerKind::Local => Ok(Arc::new(LocalRunner::new(config.clone()))),
        RunnerKind::Cluster => Ok(Arc::new(GridEngineRunner::new(config.clone()))),
        RunnerKind::Remote => Ok(Arc::new(DelegatingRunner::new(config.clone())?)),
    }
}

/// Dispatcher with every configured runner registered.
pub fn build_dispatcher(
    config: &Config,
) -> Result<(Dispatcher, UnboundedReceiver<StatusEvent>), RunnerError> {
    let (mut dispatcher, events) = Dispatcher::new(config.dispatcher.clone());
    for runner_config in &config.runners {
        dispatcher.add_runner(create_runner(runner_config)?, runner_config.limit);
    }
    Ok((dispatcher, events))
}

/// Run each configured runner's test command once, all runners at a time.
/// Every check gets a fresh directory under `<jobs_dir>/.health/`.
pub async fn check_runners(config: &Config) -> Result<Vec<HealthReport>, RunnerError> {
    let scratch = config.dispatcher.jobs_dir.join(".health");
    let mut checks = Vec::with_capacity(config.runners.len());
    for runner_config in &config.runners {
        let work_dir = scratch.join(&runner_config.name);
        let command = Command::new(runner_config.health_args()).with_cwd(work_dir);
        let check = HealthCheck::new(command, runner_config.health_timeout());
        checks.push((create_runner(runner_config)?, check));
    }
    Ok(check_all(&checks, &scratch).await)
}

/// Write a job.json snapshot for every job that changed status.
pub fn persist_events(dispatcher: &Dispatcher, events: &mut UnboundedReceiver<StatusEvent>) {
    while let Ok(event) = events.try_recv() {
        debug!("{}", event);
        let Some(job) = dispatcher.job(&event.job_id) else {
            continue;
        };
        if let Err(e) = JobRecord::from_job(job).write_to_dir(&job.work_dir) {
            warn!("Failed to record job {}: {}", job.id, e);
        }
    }
}

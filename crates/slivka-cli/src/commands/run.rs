use crate::commands::status::print_status;
use crate::dispatch;
use runner_core::config::Config;
use runner_core::{Command, JobRecord, JobStatus};
use std::path::PathBuf;

pub async fn run(
    config: &Config,
    runner_name: &str,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    json: bool,
) -> anyhow::Result<()> {
    let (mut dispatcher, mut events) = dispatch::build_dispatcher(config)?;

    let cwd = match cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let command = Command::new(args).with_cwd(cwd).with_envs(env);
    let job_id = dispatcher.submit(command, runner_name)?;
    eprintln!("Job {} submitted to {}", job_id, runner_name);

    // Ctrl-C asks the runner to stop the job instead of abandoning it
    let cancel = dispatcher.cancel_handle();
    let interrupted = job_id.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling job {}...", interrupted);
            if !cancel.request(interrupted.clone()) {
                break;
            }
        }
    });

    let poll = dispatcher.settings().poll_interval();
    loop {
        dispatcher.run_cycle().await;
        dispatch::persist_events(&dispatcher, &mut events);
        match dispatcher.status(&job_id) {
            Some(status) if status.is_terminal() => break,
            Some(_) => tokio::time::sleep(poll).await,
            None => anyhow::bail!("Job {} disappeared", job_id),
        }
    }

    let job = dispatcher
        .job(&job_id)
        .ok_or_else(|| anyhow::anyhow!("Job {} disappeared", job_id))?;
    let record = JobRecord::from_job(job);
    if json {
        println!("{}", serde_json::to_string_pretty(&record.to_json())?);
    } else {
        print_status(&record);
    }

    if record.status != JobStatus::Completed {
        anyhow::bail!("Job {} finished as {}", record.job_id, record.status);
    }
    Ok(())
}

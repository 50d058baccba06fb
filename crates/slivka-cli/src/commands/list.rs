use runner_core::config::Config;
use runner_core::record::list_records;
use runner_core::JobStatus;

pub fn run(
    config: &Config,
    json: bool,
    status_filter: Option<String>,
    runner_filter: Option<String>,
) -> anyhow::Result<()> {
    let mut records = list_records(&config.dispatcher.jobs_dir)?;

    if let Some(ref status_str) = status_filter {
        let target: JobStatus = status_str.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        records.retain(|r| r.status == target);
    }
    if let Some(ref runner) = runner_filter {
        records.retain(|r| r.runner == *runner);
    }

    if json {
        let entries: Vec<_> = records.iter().map(|r| r.to_json()).collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }
    println!(
        "{:<38} {:<12} {:<12} {:<20} {}",
        "JOB ID", "RUNNER", "STATUS", "HANDLE", "COMMAND"
    );
    println!("{}", "-".repeat(100));
    for r in &records {
        println!(
            "{:<38} {:<12} {:<12} {:<20} {}",
            r.job_id.to_string(),
            r.runner,
            r.status.to_string(),
            r.handle.as_deref().unwrap_or("-"),
            r.args.join(" "),
        );
    }
    Ok(())
}

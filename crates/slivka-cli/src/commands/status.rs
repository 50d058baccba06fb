use runner_core::config::Config;
use runner_core::{JobId, JobRecord};

pub fn run(config: &Config, job_id: &str, json: bool) -> anyhow::Result<()> {
    let record = load_record(config, job_id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record.to_json())?);
    } else {
        print_status(&record);
    }
    Ok(())
}

pub fn print_status(record: &JobRecord) {
    println!("Job:      {}", record.job_id);
    println!("Runner:   {}", record.runner);
    println!("Status:   {}", record.status);
    println!("Command:  {}", record.args.join(" "));
    println!("Cwd:      {}", record.cwd.display());
    println!("Work dir: {}", record.work_dir.display());
    println!("Handle:   {}", record.handle.as_deref().unwrap_or("N/A"));
    println!("Created:  {}", record.created_at);
    println!("Updated:  {}", record.updated_at);
    if let Some(finished) = record.finished_at {
        println!("Finished: {}", finished);
    }
}

pub fn load_record(config: &Config, job_id: &str) -> anyhow::Result<JobRecord> {
    let id = JobId::from_string(job_id.to_string());
    JobRecord::load(&config.dispatcher.jobs_dir, &id)
        .map_err(|e| anyhow::anyhow!("No record for job {}: {}", job_id, e))
}

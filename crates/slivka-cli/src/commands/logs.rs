use crate::commands::status::load_record;
use runner_core::config::Config;
use runner_local::{stderr_path, stdout_path, tail_log};

pub fn run(config: &Config, job_id: &str, lines: usize, stderr: bool) -> anyhow::Result<()> {
    let record = load_record(config, job_id)?;
    let path = if stderr {
        stderr_path(&record.work_dir)
    } else {
        stdout_path(&record.work_dir)
    };

    let log_lines = tail_log(&path, lines)?;
    if log_lines.is_empty() {
        eprintln!("No output captured at {}", path.display());
    }
    for line in &log_lines {
        println!("{}", line);
    }
    Ok(())
}

use runner_core::Config;
use std::path::Path;

const SAMPLE_CONFIG: &str = r#"# slivka job dispatcher configuration

dispatcher:
  poll_interval_ms: 1000
  call_timeout_ms: 30000
  jobs_dir: /var/tmp/slivka-jobs
  max_submit_failures: 10
  max_check_failures: 10

runners:
  - name: local
    type: local
    limit: 4
    grace_period_ms: 5000

  - name: sge
    type: cluster
    limit: 100
    submit_args: [-q, all.q]
    health_command: [hostname]
    health_timeout_ms: 300000
    env:
      OMP_NUM_THREADS: "2"

  - name: peer
    type: remote
    url: http://peer:4040
    limit: 50
    request_timeout_ms: 10000
    retry:
      max_attempts: 3
      initial_delay_ms: 200
"#;

pub fn run(explicit: Option<&Path>, path: bool, init: bool) -> anyhow::Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    if path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config already exists at: {}", config_path.display());
            println!("Remove it first if you want to reinitialize.");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, SAMPLE_CONFIG)?;
        println!("Sample config written to: {}", config_path.display());
        return Ok(());
    }

    println!("Config path: {}", config_path.display());
    let config = if config_path.exists() {
        Config::load_from(&config_path)?
    } else {
        println!("Status:      not found, using a single local runner");
        Config::local_only()
    };
    println!("Jobs dir:    {}", config.dispatcher.jobs_dir.display());
    println!("Runners:     {}", config.runners.len());
    for r in &config.runners {
        println!("  - {} ({}, limit {})", r.name, r.runner_type, r.limit);
    }

    Ok(())
}

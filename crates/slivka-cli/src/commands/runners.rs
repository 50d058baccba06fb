use crate::dispatch::check_runners;
use runner_core::config::{Config, RunnerConfig};
use runner_core::handle::RunnerKind;

pub fn run(config: &Config, json: bool) -> anyhow::Result<()> {
    if config.runners.is_empty() {
        println!("No runners configured.");
        println!("Run `slivka-dispatch config --init` to create a sample config.");
        return Ok(());
    }

    if json {
        let entries: Vec<serde_json::Value> = config
            .runners
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "type": r.runner_type.to_string(),
                    "limit": r.limit,
                    "target": target(r),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!("{:<15} {:<10} {:<7} {}", "NAME", "TYPE", "LIMIT", "TARGET");
        println!("{}", "-".repeat(60));
        for r in &config.runners {
            println!("{:<15} {:<10} {:<7} {}", r.name, r.runner_type.to_string(), r.limit, target(r));
        }
    }

    Ok(())
}

/// Run every runner's health check and fail if any of them is unhealthy.
pub async fn check(config: &Config, json: bool) -> anyhow::Result<()> {
    let reports = check_runners(config).await?;

    if json {
        let entries: Vec<serde_json::Value> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.runner,
                    "state": r.state.to_string(),
                    "message": r.message,
                    "checked_at": r.checked_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!("{:<15} {:<12} {}", "NAME", "STATUS", "MESSAGE");
        println!("{}", "-".repeat(60));
        for r in &reports {
            println!("{:<15} {:<12} {}", r.runner, r.state.to_string(), r.message);
        }
    }

    let unhealthy = reports.iter().filter(|r| !r.is_ok()).count();
    if unhealthy > 0 {
        anyhow::bail!("{} of {} runners failed their health check", unhealthy, reports.len());
    }
    Ok(())
}

/// Where a runner sends its work.
fn target(r: &RunnerConfig) -> String {
    match r.runner_type {
        RunnerKind::Local => "this host".to_string(),
        RunnerKind::Cluster => {
            let mut line = r.submit_binary().to_string();
            for arg in &r.submit_args {
                line.push(' ');
                line.push_str(arg);
            }
            line
        }
        RunnerKind::Remote => r.url.clone().unwrap_or_else(|| "-".into()),
    }
}

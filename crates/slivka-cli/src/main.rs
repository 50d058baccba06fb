use anyhow::Result;
use clap::{Parser, Subcommand};
use runner_core::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod dispatch;

#[derive(Parser)]
#[command(name = "slivka-dispatch")]
#[command(about = "Run commands on local, cluster and remote runners", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/slivka/dispatch.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a command and follow it until it finishes
    Run {
        /// Runner name from the config
        runner: String,

        /// Directory the command runs in (default: current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Environment variable for the command, KEY=VALUE
        #[arg(short, long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,

        /// Print the final job record as JSON
        #[arg(long)]
        json: bool,

        /// Program and arguments, after `--`
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },

    /// Show the recorded status of a job
    Status {
        /// Job ID
        job_id: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List recorded jobs
    List {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,

        /// Only jobs in this status
        #[arg(short, long)]
        status: Option<String>,

        /// Only jobs on this runner
        #[arg(short, long)]
        runner: Option<String>,
    },

    /// Show captured output of a job
    Logs {
        /// Job ID
        job_id: String,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,

        /// Show stderr instead of stdout
        #[arg(long)]
        stderr: bool,
    },

    /// List configured runners
    Runners {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,

        /// Run each runner's test command and report whether it completed
        #[arg(long)]
        check: bool,
    },

    /// Show or initialize the config file
    Config {
        /// Print the config path
        #[arg(long)]
        path: bool,

        /// Write a sample config
        #[arg(long)]
        init: bool,
    },
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(p) => Config::load_from(p)?,
        None => Config::load_default()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    use Commands::*;

    match cli.command {
        Run { runner, cwd, env, json, args } => {
            let config = load_config(cli.config.as_ref())?;
            commands::run(&config, &runner, args, cwd, env, json).await?;
        }
        Status { job_id, json } => {
            let config = load_config(cli.config.as_ref())?;
            commands::status(&config, &job_id, json)?;
        }
        List { json, status, runner } => {
            let config = load_config(cli.config.as_ref())?;
            commands::list(&config, json, status, runner)?;
        }
        Logs { job_id, lines, stderr } => {
            let config = load_config(cli.config.as_ref())?;
            commands::logs(&config, &job_id, lines, stderr)?;
        }
        Runners { json, check } => {
            let config = load_config(cli.config.as_ref())?;
            if check {
                commands::check_runners(&config, json).await?;
            } else {
                commands::runners(&config, json)?;
            }
        }
        Commands::Config { path, init } => {
            commands::config(cli.config.as_deref(), path, init)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        assert_eq!(parse_env("A=1").unwrap(), ("A".to_string(), "1".to_string()));
        assert_eq!(parse_env("A=x=y").unwrap(), ("A".to_string(), "x=y".to_string()));
        assert_eq!(parse_env("EMPTY=").unwrap(), ("EMPTY".to_string(), String::new()));
        assert!(parse_env("novalue").is_err());
        assert!(parse_env("=1").is_err());
    }

    #[test]
    fn test_run_args_after_separator() {
        let cli = Cli::try_parse_from([
            "slivka-dispatch", "run", "sge", "--env", "A=1", "--", "blastp", "-query", "in.fa",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { runner, env, args, .. } => {
                assert_eq!(runner, "sge");
                assert_eq!(env, vec![("A".to_string(), "1".to_string())]);
                assert_eq!(args, vec!["blastp", "-query", "in.fa"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_runners_check_flag() {
        let cli = Cli::try_parse_from(["slivka-dispatch", "runners", "--check", "--json"]).unwrap();
        match cli.command {
            Commands::Runners { json, check } => assert!(json && check),
            _ => panic!("expected runners"),
        }
    }
}

//! Quarry: local job runner.
//!
//! Main binary with subcommands:
//! - `daemon`: run the scheduler until interrupted
//! - `trigger`: run one job immediately, independent of its schedule
//! - `status`: latest recorded outcome and next fire time per job
//! - `check`: validate the config and probe declared dependencies

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quarry_exec::{ProcessExecutor, ResultRecorder, missing_dependencies};
use quarry_scheduler::TriggerKind;

mod config;
mod daemon;

use config::RunnerConfig;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Local job runner", long_about = None)]
struct Cli {
    /// Path to the runner configuration file
    #[arg(long, env = "QUARRY_CONFIG", default_value = "config/runner.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon until interrupted
    Daemon,

    /// Run one job immediately and print its record
    Trigger {
        /// Catalog id of the job to run
        job_id: String,
    },

    /// Show the latest recorded outcome and next fire time per job
    Status,

    /// Validate the configuration and probe declared dependencies
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "quarry=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon => daemon::run(&cli.config).await,
        Commands::Trigger { job_id } => trigger(&cli.config, &job_id).await,
        Commands::Status => status(&cli.config).await,
        Commands::Check => check(&cli.config),
    }
}

async fn trigger(config_path: &std::path::Path, job_id: &str) -> Result<()> {
    let config = RunnerConfig::load(config_path).map_err(|e| miette::miette!("{}", e))?;
    let catalog = config.catalog().map_err(|e| miette::miette!("{}", e))?;
    let job = catalog
        .get(job_id)
        .ok_or_else(|| miette::miette!("job not found: {}", job_id))?
        .clone();

    std::fs::create_dir_all(&config.workspace_path).map_err(|e| miette::miette!("{}", e))?;
    std::fs::create_dir_all(&config.log_path).map_err(|e| miette::miette!("{}", e))?;

    let executor = ProcessExecutor::new(&config.runner_id, &config.workspace_path);
    let recorder = Arc::new(
        ResultRecorder::new(&config.log_path)
            .with_max_log_bytes(config.max_log_bytes)
            .with_retention_days(config.retention_days),
    );

    let record = executor.run(&job, TriggerKind::Manual).await;
    if let Err(e) = recorder.record(&record).await {
        tracing::error!(job_id = %record.job_id, error = %e, "failed to persist execution record");
    }

    println!(
        "{} [{}] {} in {} ms",
        record.job_id,
        record.run_id,
        record.outcome.label(),
        record.duration_ms
    );
    if !record.output.is_empty() {
        println!("{}", record.output);
    }

    if record.outcome.is_success() {
        Ok(())
    } else {
        Err(miette::miette!(
            "job {} finished with {}",
            job_id,
            record.outcome.label()
        ))
    }
}

async fn status(config_path: &std::path::Path) -> Result<()> {
    let config = RunnerConfig::load(config_path).map_err(|e| miette::miette!("{}", e))?;
    let catalog = config.catalog().map_err(|e| miette::miette!("{}", e))?;
    let recorder = ResultRecorder::new(&config.log_path);
    let latest = recorder
        .latest_records()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let now = Utc::now();
    for job in catalog.all() {
        let next = match job.next_fire_after(now) {
            Some(next) => next.to_rfc3339(),
            None => "manual".to_string(),
        };
        match latest.get(&job.id) {
            Some(record) => println!(
                "{}: last {} at {} ({} ms), next fire {}",
                job.id,
                record.outcome.label(),
                record.started_at.to_rfc3339(),
                record.duration_ms,
                next
            ),
            None => println!("{}: never run, next fire {}", job.id, next),
        }
    }
    Ok(())
}

fn check(config_path: &std::path::Path) -> Result<()> {
    let config = RunnerConfig::load(config_path).map_err(|e| miette::miette!("{}", e))?;
    let catalog = config.catalog().map_err(|e| miette::miette!("{}", e))?;

    let mut problems = 0;
    for job in catalog.all() {
        let missing = missing_dependencies(job);
        if missing.is_empty() {
            println!("{}: ok", job.id);
        } else {
            problems += 1;
            println!("{}: missing dependencies: {}", job.id, missing.join(", "));
        }
    }

    if problems == 0 {
        println!("configuration ok: {} jobs", catalog.len());
        Ok(())
    } else {
        Err(miette::miette!(
            "{} job(s) have unresolvable dependencies",
            problems
        ))
    }
}

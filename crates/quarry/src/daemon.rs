//! Daemon command: run the scheduler until interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tokio::sync::watch;
use tracing::{error, info};

use quarry_exec::{ProcessExecutor, ResultRecorder};
use quarry_scheduler::{JobExecutor, Scheduler};

use crate::config::RunnerConfig;

/// Interval between retention prune passes.
const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Compose executor and recorder into the scheduler's execution pipeline:
/// run the process, persist the record best-effort, hand the record back.
pub fn job_executor(executor: Arc<ProcessExecutor>, recorder: Arc<ResultRecorder>) -> JobExecutor {
    Box::new(move |job, trigger| {
        let executor = Arc::clone(&executor);
        let recorder = Arc::clone(&recorder);
        Box::pin(async move {
            let record = executor.run(&job, trigger).await;
            if let Err(e) = recorder.record(&record).await {
                // Losing the durable record is degraded observability,
                // never an execution failure.
                error!(job_id = %record.job_id, error = %e, "failed to persist execution record");
            }
            record
        })
    })
}

pub async fn run(config_path: &Path) -> Result<()> {
    let config = RunnerConfig::load(config_path).map_err(|e| miette::miette!("{}", e))?;
    let catalog = Arc::new(config.catalog().map_err(|e| miette::miette!("{}", e))?);

    std::fs::create_dir_all(&config.workspace_path).map_err(|e| miette::miette!("{}", e))?;
    std::fs::create_dir_all(&config.log_path).map_err(|e| miette::miette!("{}", e))?;

    let executor = Arc::new(ProcessExecutor::new(
        &config.runner_id,
        &config.workspace_path,
    ));
    let recorder = Arc::new(
        ResultRecorder::new(&config.log_path)
            .with_max_log_bytes(config.max_log_bytes)
            .with_retention_days(config.retention_days),
    );

    let scheduler = Scheduler::new(
        Arc::clone(&catalog),
        job_executor(executor, Arc::clone(&recorder)),
    );
    scheduler.start().await;
    info!(
        runner_id = %config.runner_id,
        jobs = catalog.len(),
        workspace = %config.workspace_path.display(),
        "quarry daemon started"
    );

    // Retention pruning: once at startup, then daily.
    let (prune_shutdown_tx, mut prune_shutdown_rx) = watch::channel(false);
    let prune_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            tokio::select! {
                _ = prune_shutdown_rx.changed() => {
                    if *prune_shutdown_rx.borrow() {
                        return;
                    }
                }
                _ = interval.tick() => {
                    match recorder.prune().await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "pruned old record directories"),
                        Err(e) => error!(error = %e, "record pruning failed"),
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    info!("shutdown requested");

    prune_shutdown_tx.send_replace(true);
    let _ = prune_handle.await;

    // Stop ticking, then let in-flight jobs finish or hit their own
    // timeouts.
    scheduler.stop().await;
    scheduler.drain().await;
    info!("quarry daemon stopped");

    Ok(())
}

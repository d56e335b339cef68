//! End-to-end tests for the runner: catalog + scheduler + process executor
//! + recorder wired together the way the daemon wires them.
//!
//! These spawn real processes (`sh`, `sleep`, `echo`) and are unix-only.
#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use quarry_exec::{ProcessExecutor, ResultRecorder};
use quarry_scheduler::{
    ExecutionRecord, JobCatalog, JobDefinition, JobExecutor, Outcome, Scheduler, SchedulerError,
    TriggerKind,
};

fn job(id: &str, command: &str, args: &[&str], timeout: Duration) -> JobDefinition {
    JobDefinition::new(
        id,
        format!("Job {id}"),
        command,
        args.iter().map(|s| s.to_string()).collect(),
        "",
        timeout,
        vec![],
    )
    .unwrap()
}

/// The daemon's execution pipeline: run the process, persist the record,
/// return it.
fn pipeline(workspace: &Path, logs: &Path) -> JobExecutor {
    let executor = Arc::new(ProcessExecutor::new("test-runner", workspace));
    let recorder = Arc::new(ResultRecorder::new(logs));
    Box::new(move |job, trigger| {
        let executor = Arc::clone(&executor);
        let recorder = Arc::clone(&recorder);
        Box::pin(async move {
            let record = executor.run(&job, trigger).await;
            recorder.record(&record).await.expect("record write");
            record
        })
    })
}

fn scheduler(jobs: Vec<JobDefinition>, workspace: &Path, logs: &Path) -> Scheduler {
    let catalog = Arc::new(JobCatalog::new(jobs).unwrap());
    Scheduler::new(catalog, pipeline(workspace, logs))
}

fn record_files(logs: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let records = logs.join("records");
    let Ok(days) = std::fs::read_dir(&records) else {
        return files;
    };
    for day in days.flatten() {
        if let Ok(entries) = std::fs::read_dir(day.path()) {
            files.extend(entries.flatten().map(|e| e.path()));
        }
    }
    files
}

mod outcomes {
    use super::*;

    #[tokio::test]
    async fn job_exceeding_timeout_is_timed_out_with_bounded_duration() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(
            vec![job("slow", "sleep", &["5"], Duration::from_secs(2))],
            dir.path(),
            dir.path(),
        );

        let record = scheduler.trigger_now("slow").await.unwrap();
        assert_eq!(record.outcome, Outcome::TimedOut);
        // Killed around the 2 s deadline, give or take scheduling slack.
        assert!(record.duration_ms >= 2_000);
        assert!(record.duration_ms < 4_000);
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(
            vec![job("exit3", "sh", &["-c", "exit 3"], Duration::from_secs(5))],
            dir.path(),
            dir.path(),
        );

        let record = scheduler.trigger_now("exit3").await.unwrap();
        assert_eq!(record.outcome, Outcome::Failure { exit_code: 3 });
    }

    #[tokio::test]
    async fn missing_dependency_is_terminal_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let mut definition = job("gated", "echo", &["ran"], Duration::from_secs(5));
        definition.dependencies = vec!["quarry-integration-missing-tool".to_string()];
        let scheduler = scheduler(vec![definition], dir.path(), dir.path());

        let record = scheduler.trigger_now("gated").await.unwrap();
        assert!(matches!(record.outcome, Outcome::DependencyMissing { .. }));
        assert!(record.output.is_empty());

        // The attempt is still durably recorded.
        let files = record_files(dir.path());
        assert_eq!(files.len(), 1);
        let stored: ExecutionRecord =
            serde_json::from_slice(&std::fs::read(&files[0]).unwrap()).unwrap();
        assert!(matches!(stored.outcome, Outcome::DependencyMissing { .. }));
    }
}

mod control_surface {
    use super::*;

    #[tokio::test]
    async fn unknown_job_id_produces_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(
            vec![job("known", "echo", &["hi"], Duration::from_secs(5))],
            dir.path(),
            dir.path(),
        );

        let err = scheduler.trigger_now("unknown").await.unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound(id) if id == "unknown"));
        assert!(record_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn concurrent_manual_triggers_write_two_records() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(
            vec![job(
                "overlap",
                "sh",
                &["-c", "sleep 0.2"],
                Duration::from_secs(5),
            )],
            dir.path(),
            dir.path(),
        );

        let (a, b) = tokio::join!(
            scheduler.trigger_now("overlap"),
            scheduler.trigger_now("overlap")
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.outcome, Outcome::Success);
        assert_eq!(b.outcome, Outcome::Success);
        assert_eq!(record_files(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn stop_keeps_reporting_live_executions() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(
            vec![job(
                "long",
                "sh",
                &["-c", "sleep 0.5"],
                Duration::from_secs(5),
            )],
            dir.path(),
            dir.path(),
        );
        scheduler.start().await;

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.trigger_now("long").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        scheduler.stop().await;
        let status = scheduler.status().await;
        assert!(status["long"].currently_running);

        handle.await.unwrap().unwrap();
        scheduler.drain().await;
        let status = scheduler.status().await;
        assert!(!status["long"].currently_running);
        assert!(status["long"].last_record.is_some());
    }

    #[tokio::test]
    async fn status_surfaces_last_failure_kind() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(
            vec![job("flaky", "sh", &["-c", "exit 7"], Duration::from_secs(5))],
            dir.path(),
            dir.path(),
        );

        scheduler.trigger_now("flaky").await.unwrap();

        let status = scheduler.status().await;
        let last = status["flaky"].last_record.as_ref().unwrap();
        assert_eq!(last.outcome, Outcome::Failure { exit_code: 7 });
        assert_eq!(last.trigger, TriggerKind::Manual);
    }
}

mod scheduling {
    use super::*;

    #[tokio::test]
    async fn scheduled_run_is_recorded_with_scheduled_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let mut definition = job("ticker", "echo", &["tick"], Duration::from_secs(5));
        // Every second, so the test observes a firing quickly.
        definition = JobDefinition::new(
            definition.id,
            definition.name,
            definition.command,
            definition.args,
            "* * * * * *",
            definition.timeout,
            vec![],
        )
        .unwrap();
        let scheduler = scheduler(vec![definition], dir.path(), dir.path());

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.stop().await;
        scheduler.drain().await;

        let status = scheduler.status().await;
        let last = status["ticker"].last_record.as_ref().unwrap();
        assert_eq!(last.trigger, TriggerKind::Scheduled);
        assert_eq!(last.outcome, Outcome::Success);
        assert!(!record_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn one_slow_job_does_not_block_another() {
        let dir = tempfile::tempdir().unwrap();
        let slow = JobDefinition::new(
            "slow",
            "Slow",
            "sleep",
            vec!["10".to_string()],
            "* * * * * *",
            Duration::from_secs(30),
            vec![],
        )
        .unwrap();
        let fast = JobDefinition::new(
            "fast",
            "Fast",
            "echo",
            vec!["fast".to_string()],
            "* * * * * *",
            Duration::from_secs(5),
            vec![],
        )
        .unwrap();
        let scheduler = scheduler(vec![slow, fast], dir.path(), dir.path());

        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(2500)).await;

        // The fast job completed at least once while the slow one is still
        // in flight.
        let status = scheduler.status().await;
        assert!(status["fast"].last_record.is_some());
        assert!(status["slow"].currently_running);

        scheduler.stop().await;
    }
}

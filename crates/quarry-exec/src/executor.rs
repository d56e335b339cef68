//! Child process execution under a hard wall-clock deadline.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use quarry_scheduler::{ExecutionRecord, JobDefinition, Outcome, TriggerKind};

use crate::deps::missing_dependencies;

/// Cap on captured combined output. Larger logs are truncated, not fatal.
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Environment variable carrying the runner id into child processes.
pub const ENV_RUNNER_ID: &str = "QUARRY_RUNNER_ID";

/// Environment variable carrying the workspace path into child processes.
pub const ENV_WORKSPACE: &str = "QUARRY_WORKSPACE";

/// Runs jobs as child processes. Commands are spawned as argument vectors,
/// never through a shell, with the working directory fixed to the runner's
/// workspace and an environment that only adds to the inherited one.
pub struct ProcessExecutor {
    runner_id: String,
    workspace: PathBuf,
}

impl ProcessExecutor {
    pub fn new(runner_id: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            runner_id: runner_id.into(),
            workspace: workspace.into(),
        }
    }

    /// Run one job to completion and return its record. Every failure mode
    /// (missing dependency, spawn failure, nonzero exit, deadline) is an
    /// [`Outcome`] variant; this function itself cannot fail.
    pub async fn run(&self, job: &JobDefinition, trigger: TriggerKind) -> ExecutionRecord {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        let missing = missing_dependencies(job);
        if !missing.is_empty() {
            debug!(job_id = %job.id, ?missing, "declared dependencies not resolvable");
            return self.finish(
                run_id,
                job,
                trigger,
                started_at,
                clock,
                Outcome::DependencyMissing { missing },
                Vec::new(),
                false,
            );
        }

        let mut cmd = Command::new(&job.command);
        cmd.args(&job.args)
            .current_dir(&self.workspace)
            .env(ENV_RUNNER_ID, &self.runner_id)
            .env(ENV_WORKSPACE, &self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return self.finish(
                    run_id,
                    job,
                    trigger,
                    started_at,
                    clock,
                    Outcome::LaunchError {
                        reason: e.to_string(),
                    },
                    Vec::new(),
                    false,
                );
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(read_capped(stdout, MAX_CAPTURE_BYTES));
        let stderr_task = tokio::spawn(read_capped(stderr, MAX_CAPTURE_BYTES));

        let deadline = tokio::time::sleep(job.timeout);
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => Outcome::Success,
                Ok(status) => Outcome::Failure {
                    exit_code: status.code().unwrap_or(-1),
                },
                Err(e) => Outcome::LaunchError {
                    reason: format!("wait failed: {e}"),
                },
            },
            _ = &mut deadline => {
                if let Err(e) = child.start_kill() {
                    warn!(job_id = %job.id, error = %e, "failed to kill timed-out process");
                }
                // Reap so the child does not linger as a zombie.
                let _ = child.wait().await;
                Outcome::TimedOut
            }
        };

        let (mut output, mut truncated) = stdout_task.await.unwrap_or_default();
        let (stderr_bytes, stderr_truncated) = stderr_task.await.unwrap_or_default();
        truncated |= stderr_truncated;
        output.extend_from_slice(&stderr_bytes);
        if output.len() > MAX_CAPTURE_BYTES {
            output.truncate(MAX_CAPTURE_BYTES);
            truncated = true;
        }

        self.finish(
            run_id, job, trigger, started_at, clock, outcome, output, truncated,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        run_id: Uuid,
        job: &JobDefinition,
        trigger: TriggerKind,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
        outcome: Outcome,
        output: Vec<u8>,
        output_truncated: bool,
    ) -> ExecutionRecord {
        ExecutionRecord {
            run_id,
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            trigger,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            outcome,
            output: String::from_utf8_lossy(&output).into_owned(),
            output_truncated,
        }
    }
}

/// Read a pipe to EOF, keeping at most `cap` bytes. The pipe is always
/// drained so the child cannot block on a full buffer.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> (Vec<u8>, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (buf, truncated)
}

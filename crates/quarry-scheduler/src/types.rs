//! Job definitions and execution records.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ConfigError;

/// A job in the catalog: one external executable invocation with a cron
/// schedule and a hard deadline. Immutable after catalog load.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    /// Unique key, stable across restarts.
    pub id: String,
    /// Human-readable label, non-unique.
    pub name: String,
    /// Executable to spawn. Never interpreted by a shell.
    pub command: String,
    /// Argument vector passed verbatim to the process.
    pub args: Vec<String>,
    /// Parsed cron schedule. `None` means manual-only.
    pub schedule: Option<Schedule>,
    /// The raw expression, kept for display and logging.
    pub schedule_expr: String,
    /// Maximum wall-clock duration. Always > 0.
    pub timeout: Duration,
    /// External tools that must resolve on PATH before launch.
    pub dependencies: Vec<String>,
}

impl JobDefinition {
    /// Build a validated definition. An empty `schedule_expr` means the job
    /// can only be triggered manually.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        schedule_expr: &str,
        timeout: Duration,
        dependencies: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        let command = command.into();

        if command.is_empty() {
            return Err(ConfigError::EmptyCommand(id));
        }
        if timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(id));
        }

        let schedule = if schedule_expr.trim().is_empty() {
            None
        } else {
            Some(
                parse_schedule(schedule_expr).map_err(|source| ConfigError::InvalidSchedule {
                    job_id: id.clone(),
                    source,
                })?,
            )
        };

        Ok(Self {
            id,
            name: name.into(),
            command,
            args,
            schedule,
            schedule_expr: schedule_expr.trim().to_string(),
            timeout,
            dependencies,
        })
    }

    /// Next fire time strictly after `after`, or `None` for manual-only jobs.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.as_ref()?.after(&after).next()
    }
}

/// Parse a cron expression in the traditional five-field form (minute, hour,
/// day-of-month, month, day-of-week) or the six/seven-field form with a
/// leading seconds field. Five-field expressions fire at second zero.
pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    let expr = expr.trim();
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

/// Whether a run was started by the schedule or by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

/// The terminal outcome of one run attempt. Every failure mode is a variant
/// here; the executor never surfaces an error to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Process exited with code 0.
    Success,
    /// Process ran and exited nonzero.
    Failure { exit_code: i32 },
    /// Process was still alive at the deadline and was killed.
    TimedOut,
    /// A declared dependency did not resolve; no process was spawned.
    DependencyMissing { missing: Vec<String> },
    /// The process could not be started at all.
    LaunchError { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure { .. } => "failure",
            Outcome::TimedOut => "timed_out",
            Outcome::DependencyMissing { .. } => "dependency_missing",
            Outcome::LaunchError { .. } => "launch_error",
        }
    }
}

/// Durable record of one run attempt. Written exactly once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique id for this attempt.
    pub run_id: Uuid,
    /// Catalog id of the job.
    pub job_id: String,
    /// Display name at the time of the run.
    pub job_name: String,
    /// How the run was started.
    pub trigger: TriggerKind,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Measured duration in milliseconds.
    pub duration_ms: u64,
    /// Terminal outcome.
    pub outcome: Outcome,
    /// Combined stdout/stderr, lossy UTF-8, bounded.
    pub output: String,
    /// True when the capture hit the size cap.
    pub output_truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job(expr: &str) -> JobDefinition {
        JobDefinition::new(
            "test",
            "Test",
            "true",
            vec![],
            expr,
            Duration::from_secs(60),
            vec![],
        )
        .unwrap()
    }

    // === Unit Tests ===

    #[test]
    fn five_field_expression_is_normalized() {
        let job = job("*/5 * * * *");
        assert!(job.schedule.is_some());
        assert_eq!(job.schedule_expr, "*/5 * * * *");
    }

    #[test]
    fn six_field_expression_parses_as_is() {
        let job = job("0 2 * * * *");
        assert!(job.schedule.is_some());
    }

    #[test]
    fn empty_schedule_means_manual_only() {
        let job = job("");
        assert!(job.schedule.is_none());
        assert!(job.next_fire_after(Utc::now()).is_none());
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        let err = JobDefinition::new(
            "bad",
            "Bad",
            "true",
            vec![],
            "not a cron expression",
            Duration::from_secs(1),
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSchedule { job_id, .. } if job_id == "bad"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = JobDefinition::new(
            "zero",
            "Zero",
            "true",
            vec![],
            "",
            Duration::ZERO,
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimeout(id) if id == "zero"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = JobDefinition::new(
            "nocmd",
            "No Command",
            "",
            vec![],
            "",
            Duration::from_secs(1),
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCommand(id) if id == "nocmd"));
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(&Outcome::Failure { exit_code: 3 }).unwrap();
        assert_eq!(json["kind"], "failure");
        assert_eq!(json["exit_code"], 3);

        let json = serde_json::to_value(&Outcome::DependencyMissing {
            missing: vec!["python3".to_string()],
        })
        .unwrap();
        assert_eq!(json["kind"], "dependency_missing");
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = ExecutionRecord {
            run_id: Uuid::new_v4(),
            job_id: "sync".to_string(),
            job_name: "Sync".to_string(),
            trigger: TriggerKind::Manual,
            started_at: Utc::now(),
            duration_ms: 1234,
            outcome: Outcome::TimedOut,
            output: "partial output".to_string(),
            output_truncated: true,
        };

        let json = serde_json::to_string(&record).unwrap();
        let decoded: ExecutionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.run_id, record.run_id);
        assert_eq!(decoded.outcome, Outcome::TimedOut);
        assert!(decoded.output_truncated);
    }

    // === Property-Based Tests ===

    proptest! {
        // The computed next fire time is strictly after the reference time,
        // so a due job can never be considered due again immediately.
        #[test]
        fn next_fire_is_strictly_after_reference(minute in 0u32..60, hour in 0u32..24) {
            let job = job(&format!("{minute} {hour} * * *"));
            let now = Utc::now();
            let next = job.next_fire_after(now).unwrap();
            prop_assert!(next > now);
        }

        // Normalized five-field expressions always fire at second zero.
        #[test]
        fn five_field_fires_on_whole_minutes(minute in 0u32..60) {
            use chrono::Timelike;
            let job = job(&format!("{minute} * * * *"));
            let next = job.next_fire_after(Utc::now()).unwrap();
            prop_assert_eq!(next.second(), 0);
            prop_assert_eq!(next.minute(), minute);
        }

        // Firing is monotone: chaining next_fire_after always advances.
        #[test]
        fn successive_fires_advance(step in 1u32..30) {
            let job = job(&format!("*/{step} * * * *"));
            let first = job.next_fire_after(Utc::now()).unwrap();
            let second = job.next_fire_after(first).unwrap();
            prop_assert!(second > first);
        }
    }
}

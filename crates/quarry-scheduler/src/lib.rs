//! Job catalog and cron scheduler for Quarry.
//!
//! This crate provides the scheduling core:
//! - A read-only catalog of job definitions, validated at load
//! - Cron evaluation (traditional five-field and six-field expressions)
//! - A tick-driven scheduler with an in-flight map and a small control
//!   surface (start, stop, trigger-now, status)

mod catalog;
mod error;
mod scheduler;
mod types;

pub use catalog::JobCatalog;
pub use error::{ConfigError, SchedulerError};
pub use scheduler::{JobExecutor, JobStatus, Scheduler};
pub use types::{ExecutionRecord, JobDefinition, Outcome, TriggerKind, parse_schedule};

//! Error types for the catalog and scheduler.

use thiserror::Error;

/// Errors raised while loading the job catalog. All of these are fatal at
/// startup: the runner refuses to start with a bad catalog.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two job definitions share the same id.
    #[error("duplicate job id: {0}")]
    DuplicateJobId(String),

    /// A job's cron expression failed to parse.
    #[error("invalid schedule for job {job_id}: {source}")]
    InvalidSchedule {
        job_id: String,
        #[source]
        source: cron::error::Error,
    },

    /// A job declared a zero timeout.
    #[error("job {0} has a zero timeout; every job needs a deadline")]
    InvalidTimeout(String),

    /// A job has an empty command.
    #[error("job {0} has an empty command")]
    EmptyCommand(String),

    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from scheduler operations at runtime.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found in the catalog.
    #[error("job not found: {0}")]
    JobNotFound(String),
}

//! Runner configuration: a JSON snapshot read once at start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use quarry_scheduler::{ConfigError, JobCatalog, JobDefinition};

fn default_max_log_bytes() -> u64 {
    1024 * 1024
}

/// Top-level runner configuration.
#[derive(Debug, Deserialize)]
pub struct RunnerConfig {
    /// Identifier injected into every child process.
    pub runner_id: String,
    /// Working directory for all job processes.
    pub workspace_path: PathBuf,
    /// Directory for execution records and the runner log.
    pub log_path: PathBuf,
    /// Rotation threshold for the plaintext log.
    #[serde(default = "default_max_log_bytes")]
    pub max_log_bytes: u64,
    /// Prune execution records older than this many days. Absent = keep
    /// everything.
    #[serde(default)]
    pub retention_days: Option<u32>,
    /// The job catalog. Single source of truth; no jobs are added or
    /// removed at runtime.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// One job entry in the config file.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Cron expression; empty means manual-only.
    #[serde(default)]
    pub schedule: String,
    pub timeout_secs: u64,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl RunnerConfig {
    /// Read and parse the config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Build the validated catalog. Fails fast on duplicate ids, bad cron
    /// expressions, zero timeouts, or empty commands.
    pub fn catalog(&self) -> Result<JobCatalog, ConfigError> {
        let mut definitions = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            definitions.push(JobDefinition::new(
                &job.id,
                &job.name,
                &job.command,
                job.args.clone(),
                &job.schedule,
                Duration::from_secs(job.timeout_secs),
                job.dependencies.clone(),
            )?);
        }
        JobCatalog::new(definitions)
    }
}

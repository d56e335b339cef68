//! Durable execution records and the append-only text log.
//!
//! One JSON file per execution under a per-day directory, plus one line per
//! execution in `runner.log` (size-rotated). Write failures are degraded
//! observability, not execution failures: callers log them and move on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate, Utc};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use quarry_scheduler::ExecutionRecord;

/// Default rotation threshold for the plaintext log.
const DEFAULT_MAX_LOG_BYTES: u64 = 1024 * 1024;

/// Errors from record/log writes. Best-effort: the daemon logs these to
/// stderr and continues.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persists execution records under a log directory.
pub struct ResultRecorder {
    log_path: PathBuf,
    max_log_bytes: u64,
    retention_days: Option<u32>,
}

impl ResultRecorder {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
            retention_days: None,
        }
    }

    /// Rotate `runner.log` once it exceeds this many bytes.
    pub fn with_max_log_bytes(mut self, max: u64) -> Self {
        self.max_log_bytes = max;
        self
    }

    /// Prune day-directories older than this many days. `None` keeps
    /// everything.
    pub fn with_retention_days(mut self, days: Option<u32>) -> Self {
        self.retention_days = days;
        self
    }

    fn records_dir(&self) -> PathBuf {
        self.log_path.join("records")
    }

    fn log_file(&self) -> PathBuf {
        self.log_path.join("runner.log")
    }

    /// Write one record: a self-contained JSON file in the day directory
    /// and a line in the rotating text log.
    pub async fn record(&self, record: &ExecutionRecord) -> Result<(), RecordError> {
        let day_dir = self
            .records_dir()
            .join(record.started_at.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&day_dir).await?;

        let run_id = record.run_id.simple().to_string();
        let file = day_dir.join(format!(
            "{}_{}_{}.json",
            record.job_id,
            record.started_at.format("%Y%m%dT%H%M%S%3fZ"),
            &run_id[..8],
        ));
        fs::write(&file, serde_json::to_vec_pretty(record)?).await?;
        debug!(job_id = %record.job_id, path = %file.display(), "wrote execution record");

        self.append_log_line(record).await?;
        Ok(())
    }

    async fn append_log_line(&self, record: &ExecutionRecord) -> Result<(), RecordError> {
        fs::create_dir_all(&self.log_path).await?;
        self.rotate_if_needed().await?;

        let trigger = match record.trigger {
            quarry_scheduler::TriggerKind::Scheduled => "scheduled",
            quarry_scheduler::TriggerKind::Manual => "manual",
        };
        let line = format!(
            "{} {} job={} run={} trigger={} duration_ms={}\n",
            record.started_at.to_rfc3339(),
            record.outcome.label(),
            record.job_id,
            record.run_id.simple(),
            trigger,
            record.duration_ms,
        );

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Size-based rotation: `runner.log` -> `runner.log.1`, replacing any
    /// previous backup.
    async fn rotate_if_needed(&self) -> Result<(), RecordError> {
        let log = self.log_file();
        match fs::metadata(&log).await {
            Ok(meta) if meta.len() >= self.max_log_bytes => {
                let backup = self.log_path.join("runner.log.1");
                fs::rename(&log, &backup).await?;
                info!(backup = %backup.display(), "rotated runner log");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove day-directories older than the retention window. Returns the
    /// number of directories removed. No-op without a configured retention.
    pub async fn prune(&self) -> Result<usize, RecordError> {
        let Some(days) = self.retention_days else {
            return Ok(0);
        };
        let cutoff = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(days as u64))
            .unwrap_or(NaiveDate::MIN);

        let mut removed = 0;
        let mut entries = match fs::read_dir(self.records_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Ok(day) = NaiveDate::parse_from_str(name, "%Y-%m-%d") else {
                continue;
            };
            if day < cutoff {
                fs::remove_dir_all(entry.path()).await?;
                info!(day = name, "pruned old execution records");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Latest record per job, scanned from the records directory. Used by
    /// the offline status command; tolerant of unparseable files.
    pub async fn latest_records(&self) -> Result<HashMap<String, ExecutionRecord>, RecordError> {
        let mut latest: HashMap<String, ExecutionRecord> = HashMap::new();

        let mut days = match fs::read_dir(self.records_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(latest),
            Err(e) => return Err(e.into()),
        };
        while let Some(day) = days.next_entry().await? {
            if !day.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(day.path()).await?;
            while let Some(file) = files.next_entry().await? {
                if file.path().extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(record) = read_record(&file.path()).await {
                    match latest.get(&record.job_id) {
                        Some(existing) if existing.started_at >= record.started_at => {}
                        _ => {
                            latest.insert(record.job_id.clone(), record);
                        }
                    }
                }
            }
        }
        Ok(latest)
    }
}

async fn read_record(path: &Path) -> Option<ExecutionRecord> {
    let bytes = fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

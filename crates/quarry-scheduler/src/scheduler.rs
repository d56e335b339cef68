//! The scheduler: tick loop, due-job detection, and the control surface.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{ExecutionRecord, JobCatalog, JobDefinition, SchedulerError, TriggerKind};

/// Tick granularity for due-job detection.
const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Type alias for the job executor function. The executor owns the whole
/// run-and-record pipeline and always resolves to a completed record; the
/// scheduler never sees a per-execution error.
pub type JobExecutor = Box<
    dyn Fn(JobDefinition, TriggerKind) -> Pin<Box<dyn Future<Output = ExecutionRecord> + Send>>
        + Send
        + Sync,
>;

/// Point-in-time status for one job, as returned by [`Scheduler::status`].
#[derive(Debug, Clone)]
pub struct JobStatus {
    /// Outcome of the most recently completed run, if any.
    pub last_record: Option<ExecutionRecord>,
    /// Whether at least one run is in flight right now.
    pub currently_running: bool,
    /// Start time of the oldest in-flight run, if any.
    pub running_since: Option<DateTime<Utc>>,
    /// Next scheduled fire time (`None` for manual-only jobs).
    pub next_fire: Option<DateTime<Utc>>,
    /// Whether the job participates in automatic triggering.
    pub enabled: bool,
}

/// One in-flight execution, tracked for status reporting.
#[derive(Debug, Clone)]
struct InFlight {
    job_id: String,
    started_at: DateTime<Utc>,
}

/// Mutable scheduler state, guarded by a single mutex. Written by the tick
/// loop and execution tasks, read by `status()`.
#[derive(Debug, Default)]
struct State {
    next_fire: HashMap<String, DateTime<Utc>>,
    in_flight: HashMap<Uuid, InFlight>,
    last_records: HashMap<String, ExecutionRecord>,
    disabled: HashSet<String>,
}

struct Inner {
    catalog: Arc<JobCatalog>,
    executor: JobExecutor,
    state: Mutex<State>,
    shutdown: watch::Sender<bool>,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
    idle: Notify,
}

/// The scheduler. Owns the catalog and all run-time state; cheap to clone
/// (handle semantics). Constructed once per process and passed to whatever
/// control adapter fronts it.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler over a loaded catalog. Next fire times are
    /// computed immediately; the tick loop does not run until [`start`].
    ///
    /// [`start`]: Scheduler::start
    pub fn new(catalog: Arc<JobCatalog>, executor: JobExecutor) -> Self {
        let now = Utc::now();
        let mut next_fire = HashMap::new();
        for job in catalog.all() {
            if let Some(next) = job.next_fire_after(now) {
                next_fire.insert(job.id.clone(), next);
            }
        }

        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                catalog,
                executor,
                state: Mutex::new(State {
                    next_fire,
                    ..State::default()
                }),
                shutdown,
                tick_handle: Mutex::new(None),
                idle: Notify::new(),
            }),
        }
    }

    /// Begin the tick loop. Idempotent: starting a running scheduler is a
    /// no-op.
    pub async fn start(&self) {
        let mut handle = self.inner.tick_handle.lock().await;
        if let Some(h) = handle.as_ref()
            && !h.is_finished()
        {
            debug!("scheduler already started");
            return;
        }

        self.inner.shutdown.send_replace(false);
        let scheduler = self.clone();
        let shutdown_rx = self.inner.shutdown.subscribe();
        *handle = Some(tokio::spawn(async move {
            scheduler.tick_loop(shutdown_rx).await;
        }));
        info!(jobs = self.inner.catalog.len(), "scheduler started");
    }

    /// Halt the tick loop. In-flight executions run to completion or their
    /// own timeout; use [`drain`] to wait for them. Idempotent.
    ///
    /// [`drain`]: Scheduler::drain
    pub async fn stop(&self) {
        self.inner.shutdown.send_replace(true);
        let handle = self.inner.tick_handle.lock().await.take();
        if let Some(handle) = handle {
            // Tick loop observes the shutdown flag within one tick.
            if let Err(e) = handle.await {
                warn!(error = %e, "tick loop task failed");
            }
            info!("scheduler stopped");
        }
    }

    /// Wait until no executions are in flight.
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.state.lock().await.in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Run a job immediately, independent of its schedule, and wait for its
    /// record. Unknown ids produce `JobNotFound` and no record.
    pub async fn trigger_now(&self, job_id: &str) -> Result<ExecutionRecord, SchedulerError> {
        let job = self
            .inner
            .catalog
            .get(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?
            .clone();
        Ok(self.run_job(job, TriggerKind::Manual).await)
    }

    /// Include or exclude a job from automatic triggering. Disabled jobs
    /// stay reachable via [`trigger_now`].
    ///
    /// [`trigger_now`]: Scheduler::trigger_now
    pub async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<(), SchedulerError> {
        if self.inner.catalog.get(job_id).is_none() {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        }
        let mut state = self.inner.state.lock().await;
        if enabled {
            state.disabled.remove(job_id);
        } else {
            state.disabled.insert(job_id.to_string());
        }
        Ok(())
    }

    /// Point-in-time snapshot of every job's status. Never blocks on
    /// in-flight executions.
    pub async fn status(&self) -> HashMap<String, JobStatus> {
        let state = self.inner.state.lock().await;
        self.inner
            .catalog
            .all()
            .map(|job| {
                let running_since = state
                    .in_flight
                    .values()
                    .filter(|run| run.job_id == job.id)
                    .map(|run| run.started_at)
                    .min();
                let status = JobStatus {
                    last_record: state.last_records.get(&job.id).cloned(),
                    currently_running: running_since.is_some(),
                    running_since,
                    next_fire: state.next_fire.get(&job.id).copied(),
                    enabled: !state.disabled.contains(&job.id),
                };
                (job.id.clone(), status)
            })
            .collect()
    }

    /// The tick loop: compare next fire times against the wall clock, hand
    /// due jobs to the executor, and immediately advance their next fire
    /// time so a long run never blocks scheduling.
    async fn tick_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("scheduler shutting down");
                        return;
                    }
                }
                _ = interval.tick() => {
                    self.fire_due_jobs().await;
                }
            }
        }
    }

    /// One tick: fire every due, enabled job and advance next fire times.
    /// Next fire is always computed relative to the current wall clock, so
    /// system time jumps may skip or early-fire (documented best-effort).
    async fn fire_due_jobs(&self) {
        let now = Utc::now();
        let mut due = Vec::new();

        {
            let mut state = self.inner.state.lock().await;
            for job in self.inner.catalog.all() {
                let Some(fire_at) = state.next_fire.get(&job.id).copied() else {
                    continue;
                };
                if fire_at > now {
                    continue;
                }

                match job.next_fire_after(now) {
                    Some(next) => {
                        state.next_fire.insert(job.id.clone(), next);
                    }
                    None => {
                        state.next_fire.remove(&job.id);
                    }
                }

                if state.disabled.contains(&job.id) {
                    debug!(job_id = %job.id, "skipping disabled job");
                    continue;
                }
                due.push(job.clone());
            }
        }

        for job in due {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.run_job(job, TriggerKind::Scheduled).await;
            });
        }
    }

    /// Execute one job through the executor, tracking it in the in-flight
    /// map for the duration.
    async fn run_job(&self, job: JobDefinition, trigger: TriggerKind) -> ExecutionRecord {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        {
            let mut state = self.inner.state.lock().await;
            state.in_flight.insert(
                run_id,
                InFlight {
                    job_id: job.id.clone(),
                    started_at,
                },
            );
        }
        info!(job_id = %job.id, %run_id, trigger = ?trigger, "executing job");

        let record = (self.inner.executor)(job.clone(), trigger).await;

        {
            let mut state = self.inner.state.lock().await;
            state.in_flight.remove(&run_id);
            state.last_records.insert(job.id.clone(), record.clone());
            if state.in_flight.is_empty() {
                self.inner.idle.notify_waiters();
            }
        }

        if record.outcome.is_success() {
            info!(
                job_id = %job.id,
                %run_id,
                duration_ms = record.duration_ms,
                "job succeeded"
            );
        } else {
            warn!(
                job_id = %job.id,
                %run_id,
                outcome = record.outcome.label(),
                duration_ms = record.duration_ms,
                "job did not succeed"
            );
        }

        record
    }
}

//! Recurring relay jobs.
//!
//! Each armed job owns one timer task. A tick spawns the job body unless the
//! previous run of the same job is still in flight, in which case the tick is
//! dropped. Ticks that fire later than the misfire grace are skipped.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use crate::db::{self, Job, Pool, StoreError};

/// Longest accepted job interval.
pub const MAX_INTERVAL_SECS: i64 = u32::MAX as i64;

/// Body of a job tick.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &Job) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} already exists")]
    Duplicate(String),
    #[error("interval must be between 1 and 4294967295 seconds, got {0}")]
    InvalidInterval(i64),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => JobError::Duplicate(what),
            other => JobError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    Fire,
    /// Previous run still in flight.
    Coalesce,
    /// Woke up too late after the scheduled instant.
    Misfire,
}

/// Decide what to do with a tick scheduled at `scheduled` observed at `now`.
pub fn decide_tick(scheduled: Instant, now: Instant, grace: Duration, in_flight: bool) -> TickDecision {
    if now.saturating_duration_since(scheduled) > grace {
        TickDecision::Misfire
    } else if in_flight {
        TickDecision::Coalesce
    } else {
        TickDecision::Fire
    }
}

/// First deadline after `now` on the grid `previous + k * period`, or `None`
/// past the clock's range.
pub fn next_deadline(previous: Instant, now: Instant, period: Duration) -> Option<Instant> {
    let mut next = previous.checked_add(period)?;
    while next <= now {
        next = next.checked_add(period)?;
    }
    Some(next)
}

struct ArmedJob {
    job: Job,
    timer: JoinHandle<()>,
}

pub struct Scheduler {
    pool: Pool,
    runner: Arc<dyn JobRunner>,
    misfire_grace: Duration,
    armed: Mutex<HashMap<String, ArmedJob>>,
}

impl Scheduler {
    pub fn new(pool: Pool, runner: Arc<dyn JobRunner>, misfire_grace: Duration) -> Self {
        Self {
            pool,
            runner,
            misfire_grace,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Arm every persisted job. Jobs already armed are left untouched.
    #[instrument(skip_all)]
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let jobs = db::all_jobs(&self.pool).await?;
        let mut restored = 0;
        for job in jobs {
            if !(1..=MAX_INTERVAL_SECS).contains(&job.interval_secs) {
                warn!(
                    job = %job.name,
                    interval_secs = job.interval_secs,
                    "stored interval out of range; not armed"
                );
                continue;
            }
            if self.arm(job) {
                restored += 1;
            }
        }
        info!(restored, "scheduled jobs restored");
        Ok(restored)
    }

    /// Persist a new job and arm it. Nothing is armed if persisting fails.
    #[instrument(skip(self))]
    pub async fn create_job(
        &self,
        name: &str,
        list_name: &str,
        interval_secs: i64,
    ) -> Result<Job, JobError> {
        if !(1..=MAX_INTERVAL_SECS).contains(&interval_secs) {
            return Err(JobError::InvalidInterval(interval_secs));
        }
        if self.is_armed(name) {
            return Err(JobError::Duplicate(format!("job {name}")));
        }
        let job = Job {
            name: name.to_string(),
            list_name: list_name.to_string(),
            interval_secs,
        };
        db::create_job(&self.pool, &job).await?;
        self.arm(job.clone());
        info!(job = %job.name, list = %job.list_name, interval_secs, "job created");
        Ok(job)
    }

    /// Remove a job's row, then its timer. A run already in flight finishes.
    /// Returns whether the job existed in either place.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, name: &str) -> Result<bool, JobError> {
        let persisted = db::delete_job(&self.pool, name).await?;
        let armed = self.disarm(name);
        if persisted || armed {
            info!(job = %name, "job deleted");
        }
        Ok(persisted || armed)
    }

    pub fn is_armed(&self, name: &str) -> bool {
        self.lock_armed().contains_key(name)
    }

    /// Armed jobs, sorted by name.
    pub fn armed_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock_armed().values().map(|a| a.job.clone()).collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    /// Stop every timer. In-flight runs finish on their own.
    pub fn shutdown(&self) {
        for (_, armed) in self.lock_armed().drain() {
            armed.timer.abort();
        }
    }

    fn lock_armed(&self) -> std::sync::MutexGuard<'_, HashMap<String, ArmedJob>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn arm(&self, job: Job) -> bool {
        let mut armed = self.lock_armed();
        if armed.contains_key(&job.name) {
            return false;
        }
        let timer = tokio::spawn(tick_loop(
            job.clone(),
            Arc::clone(&self.runner),
            self.misfire_grace,
        ));
        debug!(job = %job.name, interval_secs = job.interval_secs, "job armed");
        armed.insert(job.name.clone(), ArmedJob { job, timer });
        true
    }

    fn disarm(&self, name: &str) -> bool {
        match self.lock_armed().remove(name) {
            Some(armed) => {
                armed.timer.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Clears the in-flight flag when a run ends, even by panic.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn tick_loop(job: Job, runner: Arc<dyn JobRunner>, grace: Duration) {
    let period = Duration::from_secs(job.interval_secs.max(1) as u64);
    let in_flight = Arc::new(AtomicBool::new(false));
    let Some(mut scheduled) = Instant::now().checked_add(period) else {
        warn!(job = %job.name, "interval beyond the clock's range; timer stopped");
        return;
    };
    loop {
        sleep_until(scheduled).await;
        let now = Instant::now();
        match decide_tick(scheduled, now, grace, in_flight.load(Ordering::Acquire)) {
            TickDecision::Fire => {
                in_flight.store(true, Ordering::Release);
                let guard = InFlight(Arc::clone(&in_flight));
                let runner = Arc::clone(&runner);
                let job = job.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    if let Err(err) = runner.run(&job).await {
                        warn!(job = %job.name, ?err, "scheduled run failed");
                    }
                });
            }
            TickDecision::Coalesce => {
                debug!(job = %job.name, "previous run still in flight; tick dropped");
            }
            TickDecision::Misfire => {
                warn!(
                    job = %job.name,
                    late_by = ?now.saturating_duration_since(scheduled),
                    "tick missed its grace window; skipped"
                );
            }
        }
        let Some(next) = next_deadline(scheduled, now, period) else {
            warn!(job = %job.name, "interval beyond the clock's range; timer stopped");
            return;
        };
        scheduled = next;
    }
}

mod common;

use async_trait::async_trait;
use common::setup_pool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tg_relaybot::db::{self, Job};
use tg_relaybot::scheduler::{JobError, JobRunner, Scheduler, MAX_INTERVAL_SECS};
use tokio::time::{sleep, Instant};

const GRACE: Duration = Duration::from_secs(30);

/// Runner that takes `duration` per run and records when each run starts.
struct SlowRunner {
    duration: Duration,
    fail: bool,
    starts: Mutex<Vec<(String, Instant)>>,
}

impl SlowRunner {
    fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            fail: false,
            starts: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            duration: Duration::ZERO,
            fail: true,
            starts: Mutex::new(Vec::new()),
        })
    }

    fn starts(&self) -> usize {
        self.starts.lock().unwrap().len()
    }
}

#[async_trait]
impl JobRunner for SlowRunner {
    async fn run(&self, job: &Job) -> anyhow::Result<()> {
        self.starts
            .lock()
            .unwrap()
            .push((job.name.clone(), Instant::now()));
        sleep(self.duration).await;
        if self.fail {
            anyhow::bail!("run of {} failed", job.name);
        }
        Ok(())
    }
}

#[tokio::test]
async fn overlapping_ticks_are_coalesced() {
    let pool = setup_pool().await;
    let runner = SlowRunner::new(Duration::from_secs(25));
    let scheduler = Scheduler::new(pool, runner.clone(), GRACE);
    scheduler.create_job("pulse", "news", 10).await.unwrap();

    tokio::time::pause();
    // Ticks at 10s, 20s and 30s; the first run lasts until 35s.
    sleep(Duration::from_secs(36)).await;
    assert_eq!(runner.starts(), 1);

    // The 40s tick finds the job idle again.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(runner.starts(), 2);
}

#[tokio::test]
async fn jobs_survive_restart_and_fire_again() {
    let pool = setup_pool().await;
    let first = Scheduler::new(pool.clone(), SlowRunner::new(Duration::ZERO), GRACE);
    let job = first.create_job("nightly", "news", 60).await.unwrap();
    assert_eq!(
        job,
        Job {
            name: "nightly".into(),
            list_name: "news".into(),
            interval_secs: 60,
        }
    );
    drop(first);

    let runner = SlowRunner::new(Duration::ZERO);
    let second = Scheduler::new(pool.clone(), runner.clone(), GRACE);
    assert!(!second.is_armed("nightly"));
    assert_eq!(second.restore().await.unwrap(), 1);
    assert_eq!(second.armed_jobs(), vec![job.clone()]);
    assert_eq!(second.restore().await.unwrap(), 0);
    assert_eq!(db::all_jobs(&pool).await.unwrap(), vec![job]);

    tokio::time::pause();
    sleep(Duration::from_secs(61)).await;
    assert_eq!(runner.starts(), 1);
}

#[tokio::test]
async fn duplicate_job_name_is_rejected_without_arming() {
    let pool = setup_pool().await;
    let scheduler = Scheduler::new(pool.clone(), SlowRunner::new(Duration::ZERO), GRACE);
    scheduler.create_job("dup", "news", 5).await.unwrap();

    let err = scheduler.create_job("dup", "other", 7).await.unwrap_err();
    assert!(matches!(err, JobError::Duplicate(_)));
    assert_eq!(scheduler.armed_jobs().len(), 1);
    assert_eq!(scheduler.armed_jobs()[0].list_name, "news");

    // Persisted but not armed here: the store still refuses the name.
    let fresh = Scheduler::new(pool.clone(), SlowRunner::new(Duration::ZERO), GRACE);
    let err = fresh.create_job("dup", "other", 7).await.unwrap_err();
    assert!(matches!(err, JobError::Duplicate(_)));
    assert!(!fresh.is_armed("dup"));
    assert_eq!(db::all_jobs(&pool).await.unwrap().len(), 1);
}

#[tokio::test]
async fn non_positive_interval_is_rejected() {
    let pool = setup_pool().await;
    let scheduler = Scheduler::new(pool.clone(), SlowRunner::new(Duration::ZERO), GRACE);

    let err = scheduler.create_job("zero", "news", 0).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidInterval(0)));
    assert!(db::all_jobs(&pool).await.unwrap().is_empty());
    assert!(scheduler.armed_jobs().is_empty());
}

#[tokio::test]
async fn deleted_job_stops_firing() {
    let pool = setup_pool().await;
    let runner = SlowRunner::new(Duration::ZERO);
    let scheduler = Scheduler::new(pool.clone(), runner.clone(), GRACE);
    scheduler.create_job("short", "news", 5).await.unwrap();

    assert!(scheduler.delete_job("short").await.unwrap());
    assert!(!scheduler.is_armed("short"));
    assert!(db::all_jobs(&pool).await.unwrap().is_empty());
    assert!(!scheduler.delete_job("short").await.unwrap());

    tokio::time::pause();
    sleep(Duration::from_secs(16)).await;
    assert_eq!(runner.starts(), 0);
}

#[tokio::test]
async fn failing_runs_keep_the_job_armed() {
    let pool = setup_pool().await;
    let runner = SlowRunner::failing();
    let scheduler = Scheduler::new(pool, runner.clone(), GRACE);
    scheduler.create_job("flaky", "news", 5).await.unwrap();

    tokio::time::pause();
    sleep(Duration::from_secs(11)).await;
    assert_eq!(runner.starts(), 2);
    assert!(scheduler.is_armed("flaky"));
}

#[tokio::test]
async fn oversized_interval_is_rejected() {
    let pool = setup_pool().await;
    let scheduler = Scheduler::new(pool.clone(), SlowRunner::new(Duration::ZERO), GRACE);

    let err = scheduler.create_job("huge", "news", i64::MAX).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidInterval(i64::MAX)));
    let err = scheduler
        .create_job("huge", "news", MAX_INTERVAL_SECS + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidInterval(_)));
    assert!(!scheduler.is_armed("huge"));
    assert!(db::all_jobs(&pool).await.unwrap().is_empty());

    scheduler
        .create_job("yearly", "news", MAX_INTERVAL_SECS)
        .await
        .unwrap();
    assert!(scheduler.is_armed("yearly"));
}

#[tokio::test]
async fn restore_skips_out_of_range_rows() {
    let pool = setup_pool().await;
    sqlx::query("INSERT INTO jobs (job_name, list_name, seconds) VALUES (?, ?, ?)")
        .bind("legacy")
        .bind("news")
        .bind(i64::MAX)
        .execute(&pool)
        .await
        .unwrap();
    let scheduler = Scheduler::new(pool.clone(), SlowRunner::new(Duration::ZERO), GRACE);
    scheduler.create_job("daily", "news", 86_400).await.unwrap();
    drop(scheduler);

    let restored = Scheduler::new(pool, SlowRunner::new(Duration::ZERO), GRACE);
    assert_eq!(restored.restore().await.unwrap(), 1);
    assert!(restored.is_armed("daily"));
    assert!(!restored.is_armed("legacy"));
}

//! Operator-facing operations. Every method takes fully formed input; the
//! dialogue that collects it lives in [`crate::handlers`].
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use crate::db::{self, Job, JobRecord, ListSummary, Pool, StoreError};
use crate::fetcher::ORIGIN_KEY;
use crate::relay::{Relay, RelayOutcome};
use crate::scheduler::{JobError, Scheduler, MAX_INTERVAL_SECS};

/// Selection that targets every list at once.
pub const ALL_LISTS: &str = "ALL";

static JOB_SPEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w\-]{3,})\|(.+)\|(\d+)$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("expected `name|list|seconds` with a name of 3+ word characters and a positive interval")]
    InvalidJobSpec,
    #[error("name must not be empty")]
    EmptyName,
    #[error("list {0} does not exist or has no destinations")]
    UnusableList(String),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub list_name: String,
    pub interval_secs: i64,
}

impl JobSpec {
    /// Parse `name|list|seconds`.
    pub fn parse(input: &str) -> Result<Self, OpsError> {
        let caps = JOB_SPEC
            .captures(input.trim())
            .ok_or(OpsError::InvalidJobSpec)?;
        let interval_secs: i64 = caps[3].parse().map_err(|_| OpsError::InvalidJobSpec)?;
        if !(1..=MAX_INTERVAL_SECS).contains(&interval_secs) {
            return Err(OpsError::InvalidJobSpec);
        }
        Ok(Self {
            name: caps[1].to_string(),
            list_name: caps[2].trim().to_string(),
            interval_secs,
        })
    }
}

/// Destinations block: first non-empty line names the list, the rest are
/// identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBlock {
    pub list_name: String,
    pub identifiers: Vec<String>,
}

impl TargetBlock {
    pub fn parse(input: &str) -> Option<Self> {
        let mut lines = input.lines().map(str::trim).filter(|l| !l.is_empty());
        let list_name = lines.next()?.to_string();
        Some(Self {
            list_name,
            identifiers: lines.map(str::to_string).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    EmptyInput,
    UnknownList(String),
    Added {
        list_name: String,
        added: usize,
        skipped: usize,
    },
}

pub struct Console {
    pool: Pool,
    relay: Arc<Relay>,
    scheduler: Arc<Scheduler>,
}

impl Console {
    pub fn new(pool: Pool, relay: Arc<Relay>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            pool,
            relay,
            scheduler,
        }
    }

    /// Store `identifier` as the source if it resolves. Returns whether it did.
    #[instrument(skip(self))]
    pub async fn define_source(&self, identifier: &str) -> Result<bool, OpsError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(OpsError::EmptyName);
        }
        if self.relay.resolve(identifier).await.is_none() {
            return Ok(false);
        }
        db::set_config(&self.pool, ORIGIN_KEY, identifier).await?;
        info!(%identifier, "source defined");
        Ok(true)
    }

    pub async fn source(&self) -> Result<Option<String>, OpsError> {
        Ok(db::get_config(&self.pool, ORIGIN_KEY).await?)
    }

    /// Whether the newest source message can be read.
    pub async fn probe_source(&self) -> bool {
        self.relay.peek_latest().await.is_some()
    }

    pub async fn create_list(&self, name: &str) -> Result<(), OpsError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OpsError::EmptyName);
        }
        db::create_list(&self.pool, name).await?;
        Ok(())
    }

    pub async fn delete_list(&self, name: &str) -> Result<bool, OpsError> {
        Ok(db::delete_list(&self.pool, name.trim()).await?)
    }

    pub async fn lists(&self) -> Result<Vec<ListSummary>, OpsError> {
        Ok(db::list_summaries(&self.pool).await?)
    }

    pub async fn list_names(&self) -> Result<Vec<String>, OpsError> {
        Ok(db::list_names(&self.pool).await?)
    }

    /// Add every identifier of a destinations block to its list.
    #[instrument(skip_all)]
    pub async fn add_destinations(&self, block: &str) -> Result<AddOutcome, OpsError> {
        let Some(block) = TargetBlock::parse(block) else {
            return Ok(AddOutcome::EmptyInput);
        };
        if !db::list_exists(&self.pool, &block.list_name).await? {
            return Ok(AddOutcome::UnknownList(block.list_name));
        }
        let (mut added, mut skipped) = (0, 0);
        for identifier in &block.identifiers {
            match db::add_destination(&self.pool, &block.list_name, identifier).await {
                Ok(()) => added += 1,
                Err(err) => {
                    tracing::warn!(%identifier, %err, "destination skipped");
                    skipped += 1;
                }
            }
        }
        Ok(AddOutcome::Added {
            list_name: block.list_name,
            added,
            skipped,
        })
    }

    /// Relay the newest source message to one list, or to every list with
    /// [`ALL_LISTS`].
    #[instrument(skip(self))]
    pub async fn send_now(&self, selection: &str) -> Result<RelayOutcome, OpsError> {
        let selection = selection.trim();
        let destinations = if selection.eq_ignore_ascii_case(ALL_LISTS) {
            db::all_destinations(&self.pool).await?
        } else {
            db::destinations_of(&self.pool, selection).await?
        };
        Ok(self.relay.relay_latest(&destinations).await)
    }

    /// Create a job from `name|list|seconds`. The list must currently hold at
    /// least one destination.
    pub async fn create_job(&self, spec: &str) -> Result<Job, OpsError> {
        let spec = JobSpec::parse(spec)?;
        if db::destinations_of(&self.pool, &spec.list_name).await?.is_empty() {
            return Err(OpsError::UnusableList(spec.list_name));
        }
        Ok(self
            .scheduler
            .create_job(&spec.name, &spec.list_name, spec.interval_secs)
            .await?)
    }

    pub async fn delete_job(&self, name: &str) -> Result<bool, OpsError> {
        Ok(self.scheduler.delete_job(name.trim()).await?)
    }

    /// Persisted jobs with their creation time, ordered by name.
    pub async fn jobs(&self) -> Result<Vec<JobRecord>, OpsError> {
        Ok(db::job_records(&self.pool).await?)
    }
}

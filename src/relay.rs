//! Replication of one relay unit to a sequence of destinations.
//!
//! All relay work, scheduled or on demand, goes through a single [`Relay`].
//! It owns the platform session and holds a mutex for the whole
//! fetch-then-send sequence, so two runs never interleave on the session.
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Job, Pool};
use crate::fetcher::SourceFetcher;
use crate::model::{RelayUnit, SourceMessage};
use crate::platform::{Peer, Platform, PlatformError};
use crate::resolver::resolve_peer;
use crate::scheduler::JobRunner;

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Pause after every successful send.
    pub send_delay: Duration,
    /// Pause after a failed send.
    pub failure_backoff: Duration,
    /// Added on top of every flood wait.
    pub flood_margin: Duration,
    /// Upper bound for one destination's send.
    pub send_timeout: Duration,
    pub album_window: i32,
    pub scratch_dir: PathBuf,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_millis(800),
            failure_backoff: Duration::from_millis(1200),
            flood_margin: Duration::from_secs(1),
            send_timeout: Duration::from_secs(120),
            album_window: crate::album::DEFAULT_WINDOW,
            scratch_dir: std::env::temp_dir(),
        }
    }
}

impl RelaySettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            send_delay: Duration::from_millis(cfg.relay.send_delay_ms),
            failure_backoff: Duration::from_millis(cfg.relay.failure_backoff_ms),
            flood_margin: Duration::from_secs(cfg.relay.flood_margin_secs),
            send_timeout: Duration::from_secs(cfg.relay.send_timeout_secs),
            album_window: cfg.relay.album_window,
            scratch_dir: cfg.app.media_dir(),
        }
    }
}

/// Aggregate result of one replication run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl ReplicationReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No source configured, or its newest message could not be read.
    NothingToRelay,
    NoDestinations,
    Delivered(ReplicationReport),
}

pub struct Relay {
    platform: Arc<dyn Platform>,
    pool: Pool,
    settings: RelaySettings,
    session: Mutex<()>,
}

impl Relay {
    pub fn new(platform: Arc<dyn Platform>, pool: Pool, settings: RelaySettings) -> Self {
        Self {
            platform,
            pool,
            settings,
            session: Mutex::new(()),
        }
    }

    fn fetcher(&self) -> SourceFetcher<'_> {
        SourceFetcher::new(
            self.platform.as_ref(),
            &self.pool,
            self.settings.album_window,
            &self.settings.scratch_dir,
        )
    }

    /// Read the newest source message without staging its media.
    pub async fn peek_latest(&self) -> Option<SourceMessage> {
        let _session = self.session.lock().await;
        self.fetcher().peek_latest().await.map(|(_, msg)| msg)
    }

    /// Resolve an identifier on the session, waiting for any run in progress.
    pub async fn resolve(&self, identifier: &str) -> Option<Peer> {
        let _session = self.session.lock().await;
        resolve_peer(self.platform.as_ref(), identifier).await
    }

    /// Copy `unit` to every destination, one after another.
    pub async fn replicate(&self, unit: &RelayUnit, destinations: &[String]) -> ReplicationReport {
        let _session = self.session.lock().await;
        self.replicate_locked(unit, destinations).await
    }

    /// Fetch the newest source message and copy it to `destinations`.
    #[instrument(skip_all, fields(destinations = destinations.len()))]
    pub async fn relay_latest(&self, destinations: &[String]) -> RelayOutcome {
        let _session = self.session.lock().await;
        if destinations.is_empty() {
            return RelayOutcome::NoDestinations;
        }
        let Some(staged) = self.fetcher().fetch_latest().await else {
            return RelayOutcome::NothingToRelay;
        };
        let report = self.replicate_locked(&staged.unit, destinations).await;
        // `staged` is dropped here, removing any downloaded files.
        RelayOutcome::Delivered(report)
    }

    #[instrument(skip_all, fields(kind = unit.kind(), destinations = destinations.len()))]
    async fn replicate_locked(&self, unit: &RelayUnit, destinations: &[String]) -> ReplicationReport {
        let mut report = ReplicationReport::default();
        let mut index = 0;
        while let Some(identifier) = destinations.get(index) {
            let attempt = timeout(self.settings.send_timeout, self.deliver(identifier, unit))
                .await
                .unwrap_or_else(|_| Err(PlatformError::Transient("delivery timed out".into())));
            match attempt {
                Ok(()) => {
                    report.succeeded += 1;
                    index += 1;
                    sleep(self.settings.send_delay).await;
                }
                Err(PlatformError::FloodWait(wait)) => {
                    let pause = wait + self.settings.flood_margin;
                    warn!(destination = %identifier, ?pause, "flood wait; pausing relay");
                    sleep(pause).await;
                }
                Err(PlatformError::NotFound(err)) => {
                    warn!(destination = %identifier, %err, "destination could not be resolved");
                    report.failed += 1;
                    index += 1;
                }
                Err(err) => {
                    warn!(destination = %identifier, %err, "send failed");
                    report.failed += 1;
                    index += 1;
                    sleep(self.settings.failure_backoff).await;
                }
            }
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "replication finished"
        );
        report
    }

    /// Resolve one destination and send `unit` to it.
    async fn deliver(&self, identifier: &str, unit: &RelayUnit) -> Result<(), PlatformError> {
        let peer = resolve_peer(self.platform.as_ref(), identifier)
            .await
            .ok_or_else(|| PlatformError::NotFound(identifier.to_string()))?;
        match unit {
            RelayUnit::Text { text, entities } => {
                self.platform.send_text(peer, text, entities).await
            }
            RelayUnit::Media {
                file,
                caption,
                entities,
            } => self.platform.send_media(peer, file, caption, entities).await,
            RelayUnit::Album {
                files,
                caption,
                entities,
            } => self.platform.send_album(peer, files, caption, entities).await,
        }
    }
}

#[async_trait]
impl JobRunner for Relay {
    async fn run(&self, job: &Job) -> anyhow::Result<()> {
        let destinations = db::destinations_of(&self.pool, &job.list_name).await?;
        match self.relay_latest(&destinations).await {
            RelayOutcome::Delivered(report) => info!(
                job = %job.name,
                succeeded = report.succeeded,
                failed = report.failed,
                "scheduled relay done"
            ),
            outcome => info!(job = %job.name, ?outcome, "scheduled relay skipped"),
        }
        Ok(())
    }
}

use std::path::Path;
use tracing::{debug, instrument, warn};

use crate::album::{stage_single, AlbumCollector};
use crate::db::{self, Pool};
use crate::model::{SourceMessage, StagedUnit};
use crate::platform::{Peer, Platform};
use crate::resolver::resolve_peer;

/// Config key holding the source conversation identifier.
pub const ORIGIN_KEY: &str = "origin";

/// Reads the newest message of the configured source conversation.
pub struct SourceFetcher<'a> {
    platform: &'a dyn Platform,
    pool: &'a Pool,
    album_window: i32,
    scratch_root: &'a Path,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(
        platform: &'a dyn Platform,
        pool: &'a Pool,
        album_window: i32,
        scratch_root: &'a Path,
    ) -> Self {
        Self {
            platform,
            pool,
            album_window,
            scratch_root,
        }
    }

    /// Stage the newest source message for relaying. Every failure, including
    /// a missing source, yields `None`.
    #[instrument(skip_all)]
    pub async fn fetch_latest(&self) -> Option<StagedUnit> {
        let (peer, latest) = self.peek_latest().await?;
        let staged = if latest.album_id.is_some() {
            AlbumCollector::new(self.platform, self.album_window, self.scratch_root)
                .assemble(peer, &latest)
                .await
        } else {
            stage_single(self.platform, self.scratch_root, &latest).await
        };
        match staged {
            Ok(unit) => Some(unit),
            Err(err) => {
                warn!(%err, message_id = latest.id, "failed to stage source message");
                None
            }
        }
    }

    /// Resolve the source and read its newest message without downloading.
    pub async fn peek_latest(&self) -> Option<(Peer, SourceMessage)> {
        let origin = match db::get_config(self.pool, ORIGIN_KEY).await {
            Ok(Some(origin)) => origin,
            Ok(None) => {
                debug!("no source configured");
                return None;
            }
            Err(err) => {
                warn!(%err, "failed to read source config");
                return None;
            }
        };
        let Some(peer) = resolve_peer(self.platform, &origin).await else {
            warn!(%origin, "source could not be resolved");
            return None;
        };
        match self.platform.latest_message(peer).await {
            Ok(Some(msg)) if msg.is_relayable() => Some((peer, msg)),
            Ok(Some(msg)) => {
                debug!(%peer, message_id = msg.id, "newest source message has nothing to relay");
                None
            }
            Ok(None) => {
                debug!(%peer, "source has no messages yet");
                None
            }
            Err(err) => {
                warn!(%err, %peer, "failed to read newest source message");
                None
            }
        }
    }
}

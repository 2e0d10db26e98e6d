//! Reassembly of multi-item albums from individual source messages.
use std::path::Path;
use teloxide::types::MessageEntity;
use tracing::{debug, instrument};

use crate::model::{MediaFile, RelayUnit, SourceMessage, StagedUnit};
use crate::platform::{Peer, Platform, PlatformError};

pub const DEFAULT_WINDOW: i32 = 20;

pub struct AlbumCollector<'a> {
    platform: &'a dyn Platform,
    window: i32,
    scratch_root: &'a Path,
}

impl<'a> AlbumCollector<'a> {
    pub fn new(platform: &'a dyn Platform, window: i32, scratch_root: &'a Path) -> Self {
        Self {
            platform,
            window,
            scratch_root,
        }
    }

    /// Collect every sibling of `anchor` within the id window, download their
    /// media and build one album unit.
    ///
    /// A message without an album id is staged on its own.
    #[instrument(skip_all, fields(anchor = anchor.id))]
    pub async fn assemble(
        &self,
        source: Peer,
        anchor: &SourceMessage,
    ) -> Result<StagedUnit, PlatformError> {
        let Some(album_id) = anchor.album_id.as_deref() else {
            return stage_single(self.platform, self.scratch_root, anchor).await;
        };

        let min_id = anchor.id.saturating_sub(self.window).max(1);
        let max_id = anchor.id.saturating_add(self.window);
        let mut scanned = self
            .platform
            .messages_between(source, min_id, max_id)
            .await?;
        if !scanned.iter().any(|m| m.id == anchor.id) {
            scanned.push(anchor.clone());
        }
        let items = collect_album(scanned, album_id);
        let (caption, entities) = select_caption(&items);
        debug!(album_id, items = items.len(), "album collected");

        let scratch = new_scratch(self.scratch_root, "album-")?;
        let mut files = Vec::with_capacity(items.len());
        for item in &items {
            let Some(media) = &item.media else {
                continue;
            };
            let path = self
                .platform
                .download_media(media, scratch.path(), &item.id.to_string())
                .await?;
            files.push(MediaFile {
                kind: media.kind,
                path,
            });
        }

        if files.is_empty() {
            return Ok(StagedUnit::text(caption, entities));
        }
        Ok(StagedUnit::with_scratch(
            RelayUnit::Album {
                files,
                caption,
                entities,
            },
            scratch,
        ))
    }
}

/// Keep messages belonging to `album_id`, ascending by id, one per id.
pub fn collect_album(mut messages: Vec<SourceMessage>, album_id: &str) -> Vec<SourceMessage> {
    messages.retain(|m| m.album_id.as_deref() == Some(album_id));
    messages.sort_by_key(|m| m.id);
    messages.dedup_by_key(|m| m.id);
    messages
}

/// Caption of an album: text and entities of the first item carrying text.
pub fn select_caption(items: &[SourceMessage]) -> (String, Vec<MessageEntity>) {
    items
        .iter()
        .find(|m| !m.text.is_empty())
        .map(|m| (m.text.clone(), m.entities.clone()))
        .unwrap_or_default()
}

/// Stage a standalone message: text as is, media downloaded into scratch.
pub async fn stage_single(
    platform: &dyn Platform,
    scratch_root: &Path,
    msg: &SourceMessage,
) -> Result<StagedUnit, PlatformError> {
    let Some(media) = &msg.media else {
        return Ok(StagedUnit::text(msg.text.clone(), msg.entities.clone()));
    };
    let scratch = new_scratch(scratch_root, "media-")?;
    let path = platform
        .download_media(media, scratch.path(), &msg.id.to_string())
        .await?;
    Ok(StagedUnit::with_scratch(
        RelayUnit::Media {
            file: MediaFile {
                kind: media.kind,
                path,
            },
            caption: msg.text.clone(),
            entities: msg.entities.clone(),
        },
        scratch,
    ))
}

fn new_scratch(root: &Path, prefix: &str) -> Result<tempfile::TempDir, PlatformError> {
    std::fs::create_dir_all(root)
        .and_then(|_| tempfile::Builder::new().prefix(prefix).tempdir_in(root))
        .map_err(|e| PlatformError::Transient(format!("scratch dir: {e}")))
}

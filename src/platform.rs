//! The seam between relay logic and the chat platform session.
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::MessageEntity;
use thiserror::Error;

use crate::model::{MediaFile, MediaRef, SourceMessage};

/// An addressable conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub chat_id: i64,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chat:{}", self.chat_id)
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("peer not found: {0}")]
    NotFound(String),
    /// The platform asks us to stop sending for the given duration.
    #[error("flood wait of {0:?}")]
    FloodWait(Duration),
    #[error("request failed: {0}")]
    Transient(String),
}

/// Operations the relay needs from one authenticated platform session.
///
/// Implementations are not expected to serialize calls themselves; the
/// [`Relay`](crate::relay::Relay) never issues two sequences at once.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Resolve a username or public link.
    async fn resolve_direct(&self, identifier: &str) -> Result<Peer, PlatformError>;

    /// Resolve a numeric chat id.
    async fn resolve_numeric(&self, chat_id: i64) -> Result<Peer, PlatformError>;

    async fn latest_message(&self, peer: Peer) -> Result<Option<SourceMessage>, PlatformError>;

    /// Messages with ids in `[min_id, max_id]`, any order.
    async fn messages_between(
        &self,
        peer: Peer,
        min_id: i32,
        max_id: i32,
    ) -> Result<Vec<SourceMessage>, PlatformError>;

    /// Download `media` into `dir`, naming the file after `stem`.
    async fn download_media(
        &self,
        media: &MediaRef,
        dir: &Path,
        stem: &str,
    ) -> Result<PathBuf, PlatformError>;

    async fn send_text(
        &self,
        peer: Peer,
        text: &str,
        entities: &[MessageEntity],
    ) -> Result<(), PlatformError>;

    async fn send_media(
        &self,
        peer: Peer,
        file: &MediaFile,
        caption: &str,
        entities: &[MessageEntity],
    ) -> Result<(), PlatformError>;

    /// Send every file as one grouped post carrying a single caption.
    async fn send_album(
        &self,
        peer: Peer,
        files: &[MediaFile],
        caption: &str,
        entities: &[MessageEntity],
    ) -> Result<(), PlatformError>;
}

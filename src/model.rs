use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tempfile::TempDir;
use teloxide::types::MessageEntity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Document,
    Audio,
    Voice,
    Sticker,
    VideoNote,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Animation => "animation",
            MediaKind::Document => "document",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::Sticker => "sticker",
            MediaKind::VideoNote => "video_note",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            "animation" => Some(MediaKind::Animation),
            "document" => Some(MediaKind::Document),
            "audio" => Some(MediaKind::Audio),
            "voice" => Some(MediaKind::Voice),
            "sticker" => Some(MediaKind::Sticker),
            "video_note" => Some(MediaKind::VideoNote),
            _ => None,
        }
    }
}

/// Remote media attached to a source message, addressed by platform file id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
}

/// A message read from the source conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    pub id: i32,
    pub album_id: Option<String>,
    /// Message text, or the caption for media messages.
    pub text: String,
    pub entities: Vec<MessageEntity>,
    pub media: Option<MediaRef>,
}

impl SourceMessage {
    /// Whether there is anything to copy: text, media, or album siblings.
    pub fn is_relayable(&self) -> bool {
        !self.text.is_empty() || self.media.is_some() || self.album_id.is_some()
    }
}

/// A media item downloaded to local storage, ready to be uploaded again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub kind: MediaKind,
    pub path: PathBuf,
}

/// The logical thing copied to every destination of one relay run.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayUnit {
    Text {
        text: String,
        entities: Vec<MessageEntity>,
    },
    Media {
        file: MediaFile,
        caption: String,
        entities: Vec<MessageEntity>,
    },
    Album {
        files: Vec<MediaFile>,
        caption: String,
        entities: Vec<MessageEntity>,
    },
}

impl RelayUnit {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayUnit::Text { .. } => "text",
            RelayUnit::Media { .. } => "media",
            RelayUnit::Album { .. } => "album",
        }
    }
}

/// A relay unit together with the scratch directory backing its files.
///
/// Dropping the value removes every downloaded file.
#[derive(Debug)]
pub struct StagedUnit {
    pub unit: RelayUnit,
    scratch: Option<TempDir>,
}

impl StagedUnit {
    pub fn text(text: String, entities: Vec<MessageEntity>) -> Self {
        Self {
            unit: RelayUnit::Text { text, entities },
            scratch: None,
        }
    }

    pub fn with_scratch(unit: RelayUnit, scratch: TempDir) -> Self {
        Self {
            unit,
            scratch: Some(scratch),
        }
    }

    pub fn scratch_path(&self) -> Option<PathBuf> {
        self.scratch.as_ref().map(|d| d.path().to_path_buf())
    }
}

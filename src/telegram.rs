//! Telegram Bot API implementation of [`Platform`].
//!
//! The Bot API cannot page through chat history, so every post the bot sees
//! is recorded in `source_messages`; history queries read that table.
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    InputFile, InputMedia, InputMediaAudio, InputMediaDocument, InputMediaPhoto, InputMediaVideo,
    MessageEntity, Recipient,
};
use teloxide::{ApiError, RequestError};
use tracing::{debug, instrument, warn};

use crate::db::{self, Pool};
use crate::model::{MediaFile, MediaKind, MediaRef, SourceMessage};
use crate::platform::{Peer, Platform, PlatformError};

/// Telegram accepts at most this many items in one media group.
const MAX_GROUP_SIZE: usize = 10;

static USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@?([A-Za-z][A-Za-z0-9_]{3,31})$").expect("valid regex"));

pub struct TelegramPlatform {
    bot: Bot,
    pool: Pool,
}

impl TelegramPlatform {
    pub fn new(bot: Bot, pool: Pool) -> Self {
        Self { bot, pool }
    }

    async fn chat_peer(&self, recipient: Recipient) -> Result<Peer, PlatformError> {
        let chat = self.bot.get_chat(recipient).await.map_err(map_request_error)?;
        Ok(Peer {
            chat_id: chat.id.0,
        })
    }
}

/// Extract a public username from `@name`, `name`, or a `t.me/name` link.
/// Private invite links yield `None`.
pub fn public_username(identifier: &str) -> Option<String> {
    let trimmed = identifier.trim();
    let path = ["https://", "http://"]
        .iter()
        .find_map(|scheme| trimmed.strip_prefix(scheme))
        .unwrap_or(trimmed);
    let path = ["t.me/", "telegram.me/", "www.t.me/"]
        .iter()
        .find_map(|host| path.strip_prefix(host))
        .unwrap_or(path);
    let path = path.trim_end_matches('/');
    USERNAME
        .captures(path)
        .map(|caps| format!("@{}", &caps[1]))
}

pub fn map_request_error(err: RequestError) -> PlatformError {
    match err {
        RequestError::RetryAfter(wait) => PlatformError::FloodWait(wait),
        RequestError::Api(ApiError::ChatNotFound) | RequestError::Api(ApiError::UserNotFound) => {
            PlatformError::NotFound(err.to_string())
        }
        other => PlatformError::Transient(other.to_string()),
    }
}

/// Convert a received Telegram message into the stored source form.
pub fn source_message_from(msg: &Message) -> SourceMessage {
    let (text, entities) = match msg.text() {
        Some(text) => (text, msg.entities()),
        None => (msg.caption().unwrap_or_default(), msg.caption_entities()),
    };
    SourceMessage {
        id: msg.id.0,
        album_id: msg.media_group_id().map(str::to_owned),
        text: text.to_string(),
        entities: entities.map(<[MessageEntity]>::to_vec).unwrap_or_default(),
        media: media_of(msg),
    }
}

fn media_of(msg: &Message) -> Option<MediaRef> {
    let (kind, file_id) = if let Some(sizes) = msg.photo() {
        (MediaKind::Photo, sizes.last()?.file.id.clone())
    } else if let Some(video) = msg.video() {
        (MediaKind::Video, video.file.id.clone())
    } else if let Some(animation) = msg.animation() {
        (MediaKind::Animation, animation.file.id.clone())
    } else if let Some(audio) = msg.audio() {
        (MediaKind::Audio, audio.file.id.clone())
    } else if let Some(voice) = msg.voice() {
        (MediaKind::Voice, voice.file.id.clone())
    } else if let Some(document) = msg.document() {
        (MediaKind::Document, document.file.id.clone())
    } else if let Some(sticker) = msg.sticker() {
        (MediaKind::Sticker, sticker.file.id.clone())
    } else if let Some(note) = msg.video_note() {
        (MediaKind::VideoNote, note.file.id.clone())
    } else {
        return None;
    };
    Some(MediaRef { kind, file_id })
}

/// Record a post seen in a readable chat so it can later be relayed.
#[instrument(skip_all, fields(chat_id = msg.chat.id.0, message_id = msg.id.0))]
pub async fn record_post(pool: &Pool, msg: &Message, history_limit: i64) -> anyhow::Result<()> {
    let source = source_message_from(msg);
    db::record_source_message(pool, msg.chat.id.0, &source, history_limit).await?;
    debug!(album = ?source.album_id, has_media = source.media.is_some(), "post recorded");
    Ok(())
}

fn input_media(file: &MediaFile, caption: Option<(&str, &[MessageEntity])>) -> InputMedia {
    let input = InputFile::file(&file.path);
    let caption = caption.filter(|(text, _)| !text.is_empty());
    match (file.kind, caption) {
        (MediaKind::Photo, None) => InputMedia::Photo(InputMediaPhoto::new(input)),
        (MediaKind::Photo, Some((text, entities))) => InputMedia::Photo(
            InputMediaPhoto::new(input)
                .caption(text)
                .caption_entities(entities.to_vec()),
        ),
        (MediaKind::Video, None) => InputMedia::Video(InputMediaVideo::new(input)),
        (MediaKind::Video, Some((text, entities))) => InputMedia::Video(
            InputMediaVideo::new(input)
                .caption(text)
                .caption_entities(entities.to_vec()),
        ),
        (MediaKind::Audio, None) => InputMedia::Audio(InputMediaAudio::new(input)),
        (MediaKind::Audio, Some((text, entities))) => InputMedia::Audio(
            InputMediaAudio::new(input)
                .caption(text)
                .caption_entities(entities.to_vec()),
        ),
        (_, None) => InputMedia::Document(InputMediaDocument::new(input)),
        (_, Some((text, entities))) => InputMedia::Document(
            InputMediaDocument::new(input)
                .caption(text)
                .caption_entities(entities.to_vec()),
        ),
    }
}

/// Items of one media group. The caption rides on the first item; files past
/// the group limit are dropped, since a source album never exceeds it.
fn group_items(files: &[MediaFile], caption: &str, entities: &[MessageEntity]) -> Vec<InputMedia> {
    if files.len() > MAX_GROUP_SIZE {
        warn!(files = files.len(), "album larger than one media group; extra items dropped");
    }
    files
        .iter()
        .take(MAX_GROUP_SIZE)
        .enumerate()
        .map(|(i, file)| input_media(file, (i == 0).then_some((caption, entities))))
        .collect()
}

#[async_trait]
impl Platform for TelegramPlatform {
    async fn resolve_direct(&self, identifier: &str) -> Result<Peer, PlatformError> {
        let username = public_username(identifier)
            .ok_or_else(|| PlatformError::NotFound(identifier.to_string()))?;
        self.chat_peer(Recipient::ChannelUsername(username)).await
    }

    async fn resolve_numeric(&self, chat_id: i64) -> Result<Peer, PlatformError> {
        self.chat_peer(Recipient::Id(ChatId(chat_id))).await
    }

    async fn latest_message(&self, peer: Peer) -> Result<Option<SourceMessage>, PlatformError> {
        db::latest_source_message(&self.pool, peer.chat_id)
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))
    }

    async fn messages_between(
        &self,
        peer: Peer,
        min_id: i32,
        max_id: i32,
    ) -> Result<Vec<SourceMessage>, PlatformError> {
        db::source_messages_between(&self.pool, peer.chat_id, min_id, max_id)
            .await
            .map_err(|e| PlatformError::Transient(e.to_string()))
    }

    async fn download_media(
        &self,
        media: &MediaRef,
        dir: &Path,
        stem: &str,
    ) -> Result<PathBuf, PlatformError> {
        let file = self
            .bot
            .get_file(media.file_id.clone())
            .await
            .map_err(map_request_error)?;
        // Keep the original extension from Telegram's file path.
        let ext = Path::new(&file.path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let path = dir.join(format!("{stem}.{ext}"));
        let mut dst = tokio::fs::File::create(&path)
            .await
            .map_err(|e| PlatformError::Transient(format!("create {}: {e}", path.display())))?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| PlatformError::Transient(format!("download: {e}")))?;
        Ok(path)
    }

    async fn send_text(
        &self,
        peer: Peer,
        text: &str,
        entities: &[MessageEntity],
    ) -> Result<(), PlatformError> {
        self.bot
            .send_message(ChatId(peer.chat_id), text)
            .entities(entities.to_vec())
            .await
            .map(|_| ())
            .map_err(map_request_error)
    }

    async fn send_media(
        &self,
        peer: Peer,
        file: &MediaFile,
        caption: &str,
        entities: &[MessageEntity],
    ) -> Result<(), PlatformError> {
        let chat = ChatId(peer.chat_id);
        let input = InputFile::file(&file.path);
        let entities = entities.to_vec();
        let sent = match file.kind {
            MediaKind::Photo => {
                self.bot
                    .send_photo(chat, input)
                    .caption(caption)
                    .caption_entities(entities)
                    .await
            }
            MediaKind::Video => {
                self.bot
                    .send_video(chat, input)
                    .caption(caption)
                    .caption_entities(entities)
                    .await
            }
            MediaKind::Animation => {
                self.bot
                    .send_animation(chat, input)
                    .caption(caption)
                    .caption_entities(entities)
                    .await
            }
            MediaKind::Audio => {
                self.bot
                    .send_audio(chat, input)
                    .caption(caption)
                    .caption_entities(entities)
                    .await
            }
            MediaKind::Voice => {
                self.bot
                    .send_voice(chat, input)
                    .caption(caption)
                    .caption_entities(entities)
                    .await
            }
            MediaKind::Document => {
                self.bot
                    .send_document(chat, input)
                    .caption(caption)
                    .caption_entities(entities)
                    .await
            }
            // Neither kind carries a caption.
            MediaKind::Sticker => self.bot.send_sticker(chat, input).await,
            MediaKind::VideoNote => self.bot.send_video_note(chat, input).await,
        };
        sent.map(|_| ()).map_err(map_request_error)
    }

    async fn send_album(
        &self,
        peer: Peer,
        files: &[MediaFile],
        caption: &str,
        entities: &[MessageEntity],
    ) -> Result<(), PlatformError> {
        match files {
            [] if caption.is_empty() => Ok(()),
            [] => self.send_text(peer, caption, entities).await,
            // Media groups need at least two items.
            [single] => self.send_media(peer, single, caption, entities).await,
            _ => self
                .bot
                .send_media_group(ChatId(peer.chat_id), group_items(files, caption, entities))
                .await
                .map(|_| ())
                .map_err(map_request_error),
        }
    }
}

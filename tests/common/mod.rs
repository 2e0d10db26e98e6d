#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teloxide::types::MessageEntity;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};

use tg_relaybot::db::{self, Pool};
use tg_relaybot::model::{MediaFile, MediaKind, MediaRef, SourceMessage};
use tg_relaybot::ops::Console;
use tg_relaybot::platform::{Peer, Platform, PlatformError};
use tg_relaybot::relay::{Relay, RelaySettings};
use tg_relaybot::scheduler::Scheduler;

pub const SOURCE_CHAT: i64 = -1001;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ResolveDirect(String),
    ResolveNumeric(i64),
    Download(String),
    Text {
        chat_id: i64,
        text: String,
    },
    Media {
        chat_id: i64,
        kind: MediaKind,
        caption: String,
    },
    Album {
        chat_id: i64,
        files: Vec<PathBuf>,
        caption: String,
    },
}

/// Scripted in-memory platform recording every call.
#[derive(Default)]
pub struct FakePlatform {
    usernames: HashMap<String, i64>,
    numeric_only: HashSet<i64>,
    history: HashMap<i64, Vec<SourceMessage>>,
    scripted: Mutex<HashMap<i64, VecDeque<Result<(), PlatformError>>>>,
    calls: Mutex<Vec<Call>>,
    sends: Mutex<Vec<(i64, Instant)>>,
    stalled: HashSet<String>,
    send_latency: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    /// Signalled whenever a send begins.
    pub send_started: Notify,
}

/// Counts one platform call as in progress until dropped.
struct Busy<'a>(&'a AtomicUsize);

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// `name` resolves directly to `chat_id`.
    pub fn with_username(mut self, name: &str, chat_id: i64) -> Self {
        self.usernames.insert(name.to_string(), chat_id);
        self
    }

    /// `chat_id` only resolves through the numeric fallback.
    pub fn with_numeric(mut self, chat_id: i64) -> Self {
        self.numeric_only.insert(chat_id);
        self
    }

    pub fn with_history(mut self, chat_id: i64, messages: Vec<SourceMessage>) -> Self {
        self.history.insert(chat_id, messages);
        self
    }

    /// Direct resolution of `name` never completes.
    pub fn with_stalled(mut self, name: &str) -> Self {
        self.stalled.insert(name.to_string());
        self
    }

    /// Every send takes `latency` before answering.
    pub fn with_send_latency(mut self, latency: Duration) -> Self {
        self.send_latency = latency;
        self
    }

    /// Highest number of platform calls that were in progress at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Results returned by successive sends to `chat_id`; afterwards sends succeed.
    pub fn script(self, chat_id: i64, results: Vec<Result<(), PlatformError>>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(chat_id, VecDeque::from(results));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Chat ids of every send attempt, in order.
    pub fn send_targets(&self) -> Vec<i64> {
        self.sends.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn send_instants(&self, chat_id: i64) -> Vec<Instant> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, at)| *at)
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn enter(&self) -> Busy<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        Busy(&self.active)
    }

    async fn attempt_send(&self, chat_id: i64, call: Call) -> Result<(), PlatformError> {
        let _busy = self.enter();
        self.record(call);
        self.sends.lock().unwrap().push((chat_id, Instant::now()));
        self.send_started.notify_one();
        if !self.send_latency.is_zero() {
            sleep(self.send_latency).await;
        }
        self.scripted
            .lock()
            .unwrap()
            .get_mut(&chat_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn resolve_direct(&self, identifier: &str) -> Result<Peer, PlatformError> {
        let _busy = self.enter();
        self.record(Call::ResolveDirect(identifier.to_string()));
        if self.stalled.contains(identifier) {
            std::future::pending::<()>().await;
        }
        self.usernames
            .get(identifier)
            .map(|chat_id| Peer { chat_id: *chat_id })
            .ok_or_else(|| PlatformError::NotFound(identifier.to_string()))
    }

    async fn resolve_numeric(&self, chat_id: i64) -> Result<Peer, PlatformError> {
        let _busy = self.enter();
        self.record(Call::ResolveNumeric(chat_id));
        let known = self.numeric_only.contains(&chat_id)
            || self.usernames.values().any(|id| *id == chat_id);
        if known {
            Ok(Peer { chat_id })
        } else {
            Err(PlatformError::NotFound(chat_id.to_string()))
        }
    }

    async fn latest_message(&self, peer: Peer) -> Result<Option<SourceMessage>, PlatformError> {
        let _busy = self.enter();
        Ok(self
            .history
            .get(&peer.chat_id)
            .and_then(|msgs| msgs.iter().max_by_key(|m| m.id))
            .cloned())
    }

    async fn messages_between(
        &self,
        peer: Peer,
        min_id: i32,
        max_id: i32,
    ) -> Result<Vec<SourceMessage>, PlatformError> {
        let _busy = self.enter();
        Ok(self
            .history
            .get(&peer.chat_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.id >= min_id && m.id <= max_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn download_media(
        &self,
        media: &MediaRef,
        dir: &Path,
        stem: &str,
    ) -> Result<PathBuf, PlatformError> {
        let _busy = self.enter();
        self.record(Call::Download(media.file_id.clone()));
        let path = dir.join(format!("{stem}.bin"));
        std::fs::write(&path, media.file_id.as_bytes())
            .map_err(|e| PlatformError::Transient(e.to_string()))?;
        Ok(path)
    }

    async fn send_text(
        &self,
        peer: Peer,
        text: &str,
        _entities: &[MessageEntity],
    ) -> Result<(), PlatformError> {
        self.attempt_send(
            peer.chat_id,
            Call::Text {
                chat_id: peer.chat_id,
                text: text.to_string(),
            },
        )
        .await
    }

    async fn send_media(
        &self,
        peer: Peer,
        file: &MediaFile,
        caption: &str,
        _entities: &[MessageEntity],
    ) -> Result<(), PlatformError> {
        self.attempt_send(
            peer.chat_id,
            Call::Media {
                chat_id: peer.chat_id,
                kind: file.kind,
                caption: caption.to_string(),
            },
        )
        .await
    }

    async fn send_album(
        &self,
        peer: Peer,
        files: &[MediaFile],
        caption: &str,
        _entities: &[MessageEntity],
    ) -> Result<(), PlatformError> {
        self.attempt_send(
            peer.chat_id,
            Call::Album {
                chat_id: peer.chat_id,
                files: files.iter().map(|f| f.path.clone()).collect(),
                caption: caption.to_string(),
            },
        )
        .await
    }
}

pub fn text_message(id: i32, text: &str) -> SourceMessage {
    SourceMessage {
        id,
        album_id: None,
        text: text.to_string(),
        entities: Vec::new(),
        media: None,
    }
}

pub fn album_item(id: i32, album: &str, caption: &str, kind: MediaKind) -> SourceMessage {
    SourceMessage {
        id,
        album_id: Some(album.to_string()),
        text: caption.to_string(),
        entities: Vec::new(),
        media: Some(MediaRef {
            kind,
            file_id: format!("file-{id}"),
        }),
    }
}

pub async fn setup_pool() -> Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// Settings without pauses, writing scratch files under `scratch`.
pub fn instant_settings(scratch: &Path) -> RelaySettings {
    RelaySettings {
        send_delay: Duration::ZERO,
        failure_backoff: Duration::ZERO,
        flood_margin: Duration::ZERO,
        send_timeout: Duration::from_secs(5),
        album_window: 20,
        scratch_dir: scratch.to_path_buf(),
    }
}

/// Everything an operator operation needs, wired to a fake platform.
pub struct Harness {
    pub pool: Pool,
    pub platform: Arc<FakePlatform>,
    pub relay: Arc<Relay>,
    pub scheduler: Arc<Scheduler>,
    pub console: Arc<Console>,
    pub scratch: TempDir,
}

impl Harness {
    pub async fn new(platform: FakePlatform) -> Self {
        let pool = setup_pool().await;
        let scratch = tempfile::tempdir().unwrap();
        let platform = Arc::new(platform);
        let relay = Arc::new(Relay::new(
            platform.clone(),
            pool.clone(),
            instant_settings(scratch.path()),
        ));
        let scheduler = Arc::new(Scheduler::new(
            pool.clone(),
            relay.clone(),
            Duration::from_secs(30),
        ));
        let console = Arc::new(Console::new(pool.clone(), relay.clone(), scheduler.clone()));
        Self {
            pool,
            platform,
            relay,
            scheduler,
            console,
            scratch,
        }
    }
}

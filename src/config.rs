//! Configuration loader and validator for the relay bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub relay: Relay,
    #[serde(default)]
    pub scheduler: Scheduler,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Operators allowed to drive the bot.
    pub allowed_users: Vec<i64>,
}

/// Pacing and limits applied while relaying.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Relay {
    pub send_delay_ms: u64,
    pub failure_backoff_ms: u64,
    pub flood_margin_secs: u64,
    pub send_timeout_secs: u64,
    pub album_window: i32,
    pub history_limit: i64,
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            send_delay_ms: 800,
            failure_backoff_ms: 1200,
            flood_margin_secs: 1,
            send_timeout_secs: 120,
            album_window: 20,
            history_limit: 500,
        }
    }
}

/// Recurring job settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Scheduler {
    pub misfire_grace_secs: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            misfire_grace_secs: 30,
        }
    }
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        expand_home(&self.data_dir)
    }

    /// Directory holding ephemeral media downloads.
    pub fn media_dir(&self) -> PathBuf {
        Path::new(&self.resolved_data_dir()).join("media")
    }
}

impl Scheduler {
    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_secs)
    }
}

impl Config {
    /// Ensure required directories exist (`app.data_dir` and its media dir).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.media_dir())
    }

    /// SQLite URL, overridable with `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/relaybot.db", self.app.resolved_data_dir()))
    }

    pub fn is_operator(&self, user_id: i64) -> bool {
        self.telegram.allowed_users.contains(&user_id)
    }
}

/// Expand a leading `~/` to `$HOME`. Other paths are returned unchanged.
pub fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path.to_string(),
        },
        None => path.to_string(),
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.allowed_users.is_empty() {
        return Err(ConfigError::Invalid("telegram.allowed_users must list at least one operator"));
    }
    if cfg.relay.send_timeout_secs == 0 {
        return Err(ConfigError::Invalid("relay.send_timeout_secs must be > 0"));
    }
    if cfg.relay.album_window <= 0 {
        return Err(ConfigError::Invalid("relay.album_window must be > 0"));
    }
    if cfg.relay.history_limit <= 0 {
        return Err(ConfigError::Invalid("relay.history_limit must be > 0"));
    }
    Ok(())
}

/// Example configuration file content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  allowed_users:
    - 123456789

relay:
  send_delay_ms: 800
  failure_backoff_ms: 1200
  flood_margin_secs: 1
  send_timeout_secs: 120
  album_window: 20
  history_limit: 500

scheduler:
  misfire_grace_secs: 30
"#
}

//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the retry constants used when talking to the Bot API.

use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default folder selected for chats that never ran `/newfolder`
pub const DEFAULT_FOLDER: &str = "default";

/// Letters, digits, `_`, `-` and CJK ideographs (basic block and extension A)
pub const DEFAULT_FOLDER_NAME_PATTERN: &str = r"^[\w\x{4e00}-\x{9fff}\x{3400}-\x{4dbf}-]+$";

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub bot_token: String,

    /// Base URL of a self-hosted Bot API server (e.g. `http://telegram-bot-api:8081`)
    pub telegram_api_url: Option<String>,

    /// Whether the Bot API server runs with `--local` and shares its files on disk
    #[serde(default)]
    pub telegram_local_mode: bool,

    /// Root directory that holds one sub-directory per folder
    #[serde(default = "default_download_root")]
    pub download_root: PathBuf,

    /// Quiet period after the last album item before the album is considered complete
    #[serde(default = "default_album_quiescence_ms")]
    pub album_quiescence_ms: u64,

    /// Regular expression every folder name must match
    #[serde(default = "default_folder_name_pattern")]
    pub folder_name_pattern: String,

    /// Upper bound on parallel downloads inside one batch
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// How long a finalized album id is remembered to detect late arrivals
    #[serde(default = "default_closed_album_retention_secs")]
    pub closed_album_retention_secs: u64,
}

fn default_download_root() -> PathBuf {
    PathBuf::from("/downloads")
}

const fn default_album_quiescence_ms() -> u64 {
    2000
}

fn default_folder_name_pattern() -> String {
    DEFAULT_FOLDER_NAME_PATTERN.to_string()
}

const fn default_max_concurrent_downloads() -> usize {
    4
}

const fn default_closed_album_retention_secs() -> u64 {
    60
}

/// Build the layered configuration source shared by all settings loaders.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP_DOWNLOAD_ROOT=/data ./target/app`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Plain UPPER_SNAKE_CASE variables map to snake_case keys
        .add_source(Environment::default().ignore_empty(true).try_parsing(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tg_media_saver::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or the values are unusable.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = build_config()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the ingestion engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_token.trim().is_empty() {
            return Err(ConfigError::Message("bot_token must not be empty".into()));
        }
        if self.album_quiescence_ms == 0 {
            return Err(ConfigError::Message(
                "album_quiescence_ms must be greater than zero".into(),
            ));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(ConfigError::Message(
                "max_concurrent_downloads must be at least 1".into(),
            ));
        }
        self.folder_name_regex()
            .map_err(|e| ConfigError::Message(format!("invalid folder_name_pattern: {e}")))?;
        Ok(())
    }

    /// Album quiescence window as a `Duration`
    #[must_use]
    pub const fn album_quiescence(&self) -> Duration {
        Duration::from_millis(self.album_quiescence_ms)
    }

    /// Retention window for finalized album ids
    #[must_use]
    pub const fn closed_album_retention(&self) -> Duration {
        Duration::from_secs(self.closed_album_retention_secs)
    }

    /// Compile the configured folder-name policy.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid pattern.
    pub fn folder_name_regex(&self) -> Result<Regex, regex::Error> {
        Regex::new(&self.folder_name_pattern)
    }
}

// Bot API retry configuration
/// Initial backoff delay for Bot API calls
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff delay for Bot API calls
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Retries for a single Bot API call (reply, getFile)
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

// Startup handshake configuration
/// Initial backoff delay while waiting for the Bot API server to come up
pub const BACKEND_CONNECT_INITIAL_BACKOFF_MS: u64 = 1000;
/// Maximum backoff delay while waiting for the Bot API server
pub const BACKEND_CONNECT_MAX_BACKOFF_MS: u64 = 30_000;
/// Connect attempts before startup gives up
pub const BACKEND_CONNECT_MAX_RETRIES: usize = 12;

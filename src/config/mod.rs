//! Configuration module for Sluice Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Every section has defaults,
//! so an empty file (or no file at all) yields a runnable configuration.

use crate::notify::telegram::DEFAULT_API_BASE;
use crate::notify::{TelegramSinkConfig, DEFAULT_QUEUE_CAPACITY};
use crate::session::{SessionSettings, DEFAULT_IDLE_TIMEOUT, DEFAULT_RELAY_BUFFER_CHUNKS};
use crate::storage::disk::DEFAULT_WRITE_BUFFER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Chat ids are numeric for users and groups but `@name` for channels
fn deserialize_chat_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ChatId {
        Number(i64),
        Text(String),
    }

    Ok(match ChatId::deserialize(deserializer)? {
        ChatId::Number(id) => id.to_string(),
        ChatId::Text(text) => text,
    })
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn is_unexpanded(value: &str) -> bool {
    value.contains("${")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.host cannot be empty".into(),
            ));
        }

        if !self.server.upload_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "Invalid upload_path '{}': must start with '/'",
                self.server.upload_path
            )));
        }

        if self.server.upload_path == "/health" {
            return Err(ConfigError::ValidationError(
                "upload_path cannot be '/health'".into(),
            ));
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.root cannot be empty".into(),
            ));
        }

        if self.storage.relay_buffer_chunks == 0 {
            return Err(ConfigError::ValidationError(
                "storage.relay_buffer_chunks must be at least 1".into(),
            ));
        }

        if self.storage.write_buffer_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "storage.write_buffer_bytes must be at least 1".into(),
            ));
        }

        if self.notify.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "notify.queue_capacity must be at least 1".into(),
            ));
        }

        if let Some(ref telegram) = self.notify.telegram {
            if telegram.bot_token.trim().is_empty() || is_unexpanded(&telegram.bot_token) {
                return Err(ConfigError::ValidationError(
                    "notify.telegram.bot_token is empty or references an unset variable".into(),
                ));
            }

            if telegram.chat_id.trim().is_empty() || is_unexpanded(&telegram.chat_id) {
                return Err(ConfigError::ValidationError(
                    "notify.telegram.chat_id is empty or references an unset variable".into(),
                ));
            }

            if !is_valid_http_url(&telegram.api_base) {
                return Err(ConfigError::ValidationError(
                    "Invalid notify.telegram.api_base: must start with http:// or https://".into(),
                ));
            }

            if telegram.timeout_secs == 0 {
                return Err(ConfigError::ValidationError(
                    "notify.telegram.timeout_secs must be at least 1".into(),
                ));
            }
        }

        if self.metrics.enabled && self.metrics.port == self.server.port && self.server.port != 0 {
            return Err(ConfigError::ValidationError(format!(
                "metrics.port {} collides with server.port",
                self.metrics.port
            )));
        }

        Ok(())
    }

    /// Coordinator settings derived from the storage section
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            relay_buffer_chunks: self.storage.relay_buffer_chunks,
            idle_timeout: self.storage.idle_timeout(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path accepting `POST` uploads
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
}

impl ServerConfig {
    /// Listen address as `host:port`
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upload_path: default_upload_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8383
}

fn default_upload_path() -> String {
    "/upload".to_string()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory artifacts are written to, created if absent
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Seconds to wait for request bytes before failing the session; 0 disables
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_relay_buffer_chunks")]
    pub relay_buffer_chunks: usize,
    #[serde(default = "default_write_buffer_bytes")]
    pub write_buffer_bytes: usize,
    /// Remove artifacts whose relay failed
    #[serde(default)]
    pub discard_partial: bool,
}

impl StorageConfig {
    /// Idle-read timeout, `None` when disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            idle_timeout_secs: default_idle_timeout_secs(),
            relay_buffer_chunks: default_relay_buffer_chunks(),
            write_buffer_bytes: default_write_buffer_bytes(),
            discard_partial: false,
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

fn default_relay_buffer_chunks() -> usize {
    DEFAULT_RELAY_BUFFER_CHUNKS
}

fn default_write_buffer_bytes() -> usize {
    DEFAULT_WRITE_BUFFER
}

/// Notification configuration
///
/// Without a `telegram` section events are written to the log.
///
/// # Example
///
/// ```yaml
/// notify:
///   queue_capacity: 256
///   telegram:
///     bot_token: "${TELEGRAM_BOT_TOKEN}"
///     chat_id: -1001234567890
///     send_artifacts: true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            telegram: None,
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Telegram Bot API credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token, usually given as `${VAR}`
    pub bot_token: String,
    /// Target chat. Numeric ids and `@channel` names are accepted.
    #[serde(deserialize_with = "deserialize_chat_id")]
    pub chat_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_telegram_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_send_artifacts")]
    pub send_artifacts: bool,
}

impl TelegramConfig {
    /// Sink configuration for [`crate::notify::TelegramSink`]
    pub fn sink_config(&self) -> TelegramSinkConfig {
        TelegramSinkConfig {
            bot_token: self.bot_token.clone(),
            chat_id: self.chat_id.clone(),
            api_base: self.api_base.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            send_artifacts: self.send_artifacts,
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .field("send_artifacts", &self.send_artifacts)
            .finish()
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_telegram_timeout() -> u64 {
    30
}

fn default_send_artifacts() -> bool {
    true
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    false
}

fn default_metrics_port() -> u16 {
    9090
}

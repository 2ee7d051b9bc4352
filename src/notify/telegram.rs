//! Telegram Bot API sink
//!
//! Sends events with `sendMessage` and artifacts with `sendDocument`. The
//! document body is streamed from disk, never read into memory.

use super::{NotificationSink, SinkError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// Default Bot API base URL
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram sink configuration
#[derive(Debug, Clone)]
pub struct TelegramSinkConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
    pub timeout: Duration,
    /// Send `sendDocument` for stored artifacts
    pub send_artifacts: bool,
}

/// Bot API response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram sink
pub struct TelegramSink {
    config: TelegramSinkConfig,
    http_client: reqwest::Client,
}

impl TelegramSink {
    /// Create a new Telegram sink
    pub fn new(config: TelegramSinkConfig) -> Result<Self, SinkError> {
        if config.bot_token.trim().is_empty() {
            return Err(SinkError::ConfigError("bot token cannot be empty".into()));
        }
        if config.chat_id.trim().is_empty() {
            return Err(SinkError::ConfigError("chat id cannot be empty".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::ConfigError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Get the chat id events are sent to
    pub fn chat_id(&self) -> &str {
        &self.config.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    async fn check(response: reqwest::Response) -> Result<(), SinkError> {
        let status = response.status();
        // The Bot API reports most failures as {"ok": false, "description": ...}
        let body: Option<ApiResponse> = response.json().await.ok();

        match body {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => Ok(()),
            Some(ApiResponse { description, .. }) => Err(SinkError::Rejected {
                status: status.as_u16(),
                description: description.unwrap_or_else(|| "no description".into()),
            }),
            None => Err(SinkError::Rejected {
                status: status.as_u16(),
                description: "unparseable response body".into(),
            }),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    #[tracing::instrument(name = "notify.telegram.send_message", skip(self, text), err)]
    async fn send_event(&self, text: &str) -> Result<(), SinkError> {
        let response = self
            .http_client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": self.config.chat_id,
                "text": text,
            }))
            .send()
            .await?;

        Self::check(response).await
    }

    #[tracing::instrument(
        name = "notify.telegram.send_document",
        skip(self, path),
        fields(path = %path.display()),
        err
    )]
    async fn send_artifact(&self, path: &Path) -> Result<(), SinkError> {
        if !self.config.send_artifacts {
            return Ok(());
        }

        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("artifact")
            .to_string();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let document = Part::stream_with_length(body, length)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;

        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .part("document", document);

        let response = self
            .http_client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        Self::check(response).await
    }
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("chat_id", &self.config.chat_id)
            .field("api_base", &self.config.api_base)
            .finish_non_exhaustive()
    }
}

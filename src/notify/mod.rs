//! Notification adapter
//!
//! Forwards upload lifecycle events to an external, best-effort sink.
//!
//! The coordinator only ever calls [`Notifier::notify`], which enqueues the
//! event without awaiting. A dispatcher task drains the queue and talks to
//! the sink. When the queue is full the event is dropped and counted; sink
//! failures are logged and never reach the upload path.

use crate::metrics;
use crate::relay::{FailureCause, StoredArtifact};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod telegram;

pub use telegram::{TelegramSink, TelegramSinkConfig};

/// Default notification queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Upload lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    PartStarted {
        field_name: String,
        declared_filename: String,
    },
    PartSucceeded {
        field_name: String,
        declared_filename: String,
        artifact: StoredArtifact,
    },
    PartFailed {
        field_name: String,
        declared_filename: String,
        cause: FailureCause,
    },
}

impl NotificationEvent {
    /// Human-readable text sent to the sink
    pub fn text(&self) -> String {
        match self {
            NotificationEvent::PartStarted {
                field_name,
                declared_filename,
            } => format!("Uploading {field_name}: {declared_filename}"),
            NotificationEvent::PartSucceeded {
                field_name,
                declared_filename,
                artifact,
            } => format!(
                "Upload {field_name} of {declared_filename} finished ({} bytes, stored as {})",
                artifact.size, artifact.name
            ),
            NotificationEvent::PartFailed {
                field_name,
                declared_filename,
                cause,
            } => format!("Upload {field_name} of {declared_filename} failed: {cause}"),
        }
    }

    /// Label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::PartStarted { .. } => "part_started",
            NotificationEvent::PartSucceeded { .. } => "part_succeeded",
            NotificationEvent::PartFailed { .. } => "part_failed",
        }
    }
}

/// Sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Request error: {0}")]
    RequestError(#[source] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Sink rejected request ({status}): {description}")]
    Rejected { status: u16, description: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// Request URLs embed sink credentials
impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::RequestError(err.without_url())
    }
}

/// External notification sink
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send a text event
    async fn send_event(&self, text: &str) -> Result<(), SinkError>;

    /// Send a stored artifact
    async fn send_artifact(&self, path: &Path) -> Result<(), SinkError>;
}

/// Sink that writes events to the log
///
/// Used when no external sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send_event(&self, text: &str) -> Result<(), SinkError> {
        tracing::info!(target: "sluice_uploadr::notify", "{}", text);
        Ok(())
    }

    async fn send_artifact(&self, path: &Path) -> Result<(), SinkError> {
        tracing::info!(target: "sluice_uploadr::notify", path = %path.display(), "Artifact stored");
        Ok(())
    }
}

/// Handle used by the coordinator to emit events
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<NotificationEvent>,
}

impl Notifier {
    /// Start a dispatcher task draining into `sink`
    ///
    /// The dispatcher stops once every `Notifier` clone is dropped and the
    /// queue is empty.
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(dispatch(rx, sink));
        (Self { tx }, handle)
    }

    /// Enqueue an event without waiting
    pub fn notify(&self, event: NotificationEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics::record_notification("dropped");
                tracing::warn!(event = event.kind(), "Notification queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                metrics::record_notification("dropped");
                tracing::debug!(event = event.kind(), "Notification dispatcher stopped");
            }
        }
    }
}

async fn dispatch(mut rx: mpsc::Receiver<NotificationEvent>, sink: Arc<dyn NotificationSink>) {
    while let Some(event) = rx.recv().await {
        deliver(sink.as_ref(), &event).await;
    }
    tracing::debug!("Notification dispatcher finished");
}

async fn deliver(sink: &dyn NotificationSink, event: &NotificationEvent) {
    match sink.send_event(&event.text()).await {
        Ok(()) => metrics::record_notification("sent"),
        Err(e) => {
            metrics::record_notification("failed");
            tracing::warn!(event = event.kind(), error = %e, "Failed to send notification");
        }
    }

    if let NotificationEvent::PartSucceeded { artifact, .. } = event {
        match sink.send_artifact(&artifact.path).await {
            Ok(()) => metrics::record_notification("sent"),
            Err(e) => {
                metrics::record_notification("failed");
                tracing::warn!(
                    path = %artifact.path.display(),
                    error = %e,
                    "Failed to send artifact"
                );
            }
        }
    }
}

//! Upload session coordinator
//!
//! Owns the lifecycle of one multipart upload request:
//!
//! ```text
//! Receiving ──(0..N parts)──▶ AwaitingTerminal { pending } ──▶ Responded
//! ```
//!
//! Each file part gets a storage name from the [`FilenameAllocator`] and its
//! own relay task. The coordinator reads the part's chunks off the wire and
//! forwards them through a bounded channel, then moves on to the next part
//! while earlier relays may still be flushing. Once the body is consumed and
//! every relay is terminal, the aggregated [`SessionOutcome`] decides the
//! single HTTP response.
//!
//! # Failure handling
//!
//! - A part failing does not cancel siblings; its remaining bytes are still
//!   drained so later parts parse.
//! - A transport failure stops parsing; relays already running finish.
//! - A malformed body aborts unfinished relays and marks them
//!   `MalformedRequest` without waiting on them. Their partial artifacts
//!   follow the relay's discard policy.

use crate::allocator::{FilenameAllocator, StorageName};
use crate::metrics;
use crate::notify::{NotificationEvent, Notifier};
use crate::relay::{FailureCause, PartFrame, StoredArtifact, StreamRelay, TerminalStatus};
use crate::storage::StorageBackend;
use bytes::Bytes;
use futures::Stream;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Default number of chunks buffered between parser and relay
pub const DEFAULT_RELAY_BUFFER_CHUNKS: usize = 8;

/// Default idle-read timeout
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Receiving,
    AwaitingTerminal { pending: usize },
    Responded,
}

/// Terminal record of one file part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartOutcome {
    pub field_name: String,
    pub declared_filename: String,
    pub artifact: StoredArtifact,
}

/// Aggregated result of one upload request
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub request_id: Uuid,
    /// File parts in arrival order
    pub parts: Vec<PartOutcome>,
    /// Failure affecting the request as a whole
    pub request_error: Option<FailureCause>,
}

impl SessionOutcome {
    /// Whether the request and every part succeeded
    pub fn succeeded(&self) -> bool {
        self.request_error.is_none() && self.parts.iter().all(|part| part.artifact.is_success())
    }

    /// First failure observed, in arrival order
    ///
    /// A request-level failure outranks part failures.
    pub fn first_failure(&self) -> Option<&FailureCause> {
        self.request_error
            .as_ref()
            .or_else(|| self.parts.iter().find_map(|part| part.artifact.failure()))
    }
}

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Chunks buffered per part between parser and relay
    pub relay_buffer_chunks: usize,
    /// Maximum wait for the next request bytes; `None` waits forever
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            relay_buffer_chunks: DEFAULT_RELAY_BUFFER_CHUNKS,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

/// Upload session coordinator
///
/// Cheap to clone; one instance is shared by all requests.
#[derive(Debug, Clone)]
pub struct UploadCoordinator {
    allocator: Arc<FilenameAllocator>,
    relay: StreamRelay,
    notifier: Notifier,
    settings: SessionSettings,
}

/// Identity of a discovered part, kept until its relay is terminal
struct PendingPart {
    name: StorageName,
    field_name: String,
    declared_filename: String,
    outcome: Option<PartOutcome>,
}

impl UploadCoordinator {
    /// Create a new coordinator
    pub fn new(
        allocator: Arc<FilenameAllocator>,
        relay: StreamRelay,
        notifier: Notifier,
        settings: SessionSettings,
    ) -> Self {
        Self {
            allocator,
            relay,
            notifier,
            settings,
        }
    }

    /// Filename allocator shared by all sessions
    pub fn allocator(&self) -> &Arc<FilenameAllocator> {
        &self.allocator
    }

    /// Run one upload session to completion
    ///
    /// `content_type` is the request's `Content-Type` header; `body` yields
    /// the raw request body.
    #[tracing::instrument(
        name = "upload.session",
        skip(self, content_type, body),
        fields(request_id = tracing::field::Empty, parts = tracing::field::Empty)
    )]
    pub async fn run<S, E>(&self, content_type: &str, body: S) -> SessionOutcome
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let request_id = Uuid::new_v4();
        tracing::Span::current().record("request_id", tracing::field::display(request_id));
        metrics::session_started();

        let outcome = match multer::parse_boundary(content_type) {
            Ok(boundary) => {
                self.receive(request_id, multer::Multipart::new(body, boundary))
                    .await
            }
            Err(e) => SessionOutcome {
                request_id,
                parts: Vec::new(),
                request_error: Some(FailureCause::MalformedRequest(e.to_string())),
            },
        };

        tracing::Span::current().record("parts", outcome.parts.len());
        log_transition(request_id, SessionState::Responded);
        metrics::session_finished();
        metrics::record_session(outcome.succeeded());

        match outcome.first_failure() {
            None => tracing::info!(request_id = %request_id, parts = outcome.parts.len(), "Upload session succeeded"),
            Some(cause) => tracing::warn!(
                request_id = %request_id,
                parts = outcome.parts.len(),
                error = %cause,
                "Upload session failed"
            ),
        }

        outcome
    }

    async fn receive(&self, request_id: Uuid, mut multipart: multer::Multipart<'static>) -> SessionOutcome {
        log_transition(request_id, SessionState::Receiving);

        let mut pending: Vec<PendingPart> = Vec::new();
        let mut relays: JoinSet<(usize, StoredArtifact)> = JoinSet::new();
        let mut request_error = None;

        loop {
            let mut field = match self.read(multipart.next_field()).await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(cause) => {
                    request_error = Some(cause);
                    break;
                }
            };

            let Some(declared_filename) = field.file_name().map(ToOwned::to_owned) else {
                // Plain form fields carry no file; skip their content
                tracing::debug!(request_id = %request_id, field = ?field.name(), "Skipping non-file field");
                if let Err(cause) = self.drain(&mut field).await {
                    request_error = Some(cause);
                    break;
                }
                continue;
            };
            let field_name = field.name().unwrap_or_default().to_owned();

            let name = self.allocator.allocate(&declared_filename, &field_name);
            let index = pending.len();
            tracing::info!(
                request_id = %request_id,
                field = %field_name,
                filename = %declared_filename,
                storage.name = %name,
                "Uploading part"
            );

            self.notifier.notify(NotificationEvent::PartStarted {
                field_name: field_name.clone(),
                declared_filename: declared_filename.clone(),
            });

            let (tx, rx) = mpsc::channel(self.settings.relay_buffer_chunks.max(1));
            let relay = self.relay.clone();
            let notifier = self.notifier.clone();
            let relay_name = name.clone();
            let event_field = field_name.clone();
            let event_filename = declared_filename.clone();
            relays.spawn(async move {
                let artifact = relay.run(relay_name, rx).await;
                notifier.notify(terminal_event(event_field, event_filename, &artifact));
                (index, artifact)
            });

            pending.push(PendingPart {
                name,
                field_name,
                declared_filename,
                outcome: None,
            });

            if let Err(cause) = self.forward(&mut field, &tx).await {
                // If the relay is gone or backed up it still fails on the closed channel
                let _ = tx.try_send(PartFrame::Abort(cause.clone()));
                request_error = Some(cause);
                break;
            }
        }

        // The body must not be read any further once parsing stopped
        drop(multipart);

        let malformed = matches!(request_error, Some(FailureCause::MalformedRequest(_)));
        if malformed {
            relays.abort_all();
        }

        log_transition(
            request_id,
            SessionState::AwaitingTerminal {
                pending: relays.len(),
            },
        );

        while let Some(joined) = relays.join_next().await {
            match joined {
                Ok((index, artifact)) => {
                    let part = &mut pending[index];
                    part.outcome = Some(PartOutcome {
                        field_name: part.field_name.clone(),
                        declared_filename: part.declared_filename.clone(),
                        artifact,
                    });
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => tracing::error!(request_id = %request_id, error = %e, "Relay task panicked"),
            }
        }

        let mut parts = Vec::with_capacity(pending.len());
        for mut part in pending {
            match part.outcome.take() {
                Some(outcome) => parts.push(outcome),
                None => parts.push(self.unfinished(request_id, part, malformed).await),
            }
        }

        SessionOutcome {
            request_id,
            parts,
            request_error,
        }
    }

    /// Record a part whose relay never reported a terminal state
    ///
    /// The relay was cancelled or panicked before it could apply the discard
    /// policy, so it is applied here.
    async fn unfinished(&self, request_id: Uuid, part: PendingPart, malformed: bool) -> PartOutcome {
        let cause = if malformed {
            FailureCause::MalformedRequest("request aborted before part completed".into())
        } else {
            FailureCause::Storage("relay terminated unexpectedly".into())
        };

        if self.relay.discards_partial() {
            if let Err(e) = self.relay.backend().discard(&part.name).await {
                tracing::warn!(
                    request_id = %request_id,
                    storage.name = %part.name,
                    error = %e,
                    "Failed to discard partial artifact"
                );
            }
        }

        self.notifier.notify(NotificationEvent::PartFailed {
            field_name: part.field_name.clone(),
            declared_filename: part.declared_filename.clone(),
            cause: cause.clone(),
        });

        PartOutcome {
            field_name: part.field_name,
            declared_filename: part.declared_filename,
            artifact: StoredArtifact {
                path: self.relay.backend().locate(&part.name),
                name: part.name,
                size: 0,
                status: TerminalStatus::Failed(cause),
            },
        }
    }

    /// Forward one part's chunks to its relay
    ///
    /// Keeps consuming the part after the relay hung up so the next part
    /// can be parsed.
    async fn forward(&self, field: &mut multer::Field<'static>, tx: &mpsc::Sender<PartFrame>) -> Result<(), FailureCause> {
        let mut relay_open = true;

        while let Some(chunk) = self.read(field.chunk()).await? {
            if relay_open && tx.send(PartFrame::Data(chunk)).await.is_err() {
                relay_open = false;
            }
        }

        if relay_open {
            let _ = tx.send(PartFrame::End).await;
        }
        Ok(())
    }

    async fn drain(&self, field: &mut multer::Field<'static>) -> Result<(), FailureCause> {
        while self.read(field.chunk()).await?.is_some() {}
        Ok(())
    }

    /// Await a parser read under the idle timeout
    async fn read<T, F>(&self, fut: F) -> Result<T, FailureCause>
    where
        F: Future<Output = Result<T, multer::Error>>,
    {
        let result = match self.settings.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| FailureCause::Transport(format!("no data received for {limit:?}")))?,
            None => fut.await,
        };

        result.map_err(classify)
    }
}

/// Map a parser error onto the failure taxonomy
fn classify(err: multer::Error) -> FailureCause {
    match err {
        multer::Error::StreamReadFailed(e) => FailureCause::Transport(e.to_string()),
        e @ multer::Error::IncompleteFieldData { .. } => FailureCause::Transport(e.to_string()),
        e => FailureCause::MalformedRequest(e.to_string()),
    }
}

fn terminal_event(field_name: String, declared_filename: String, artifact: &StoredArtifact) -> NotificationEvent {
    match &artifact.status {
        TerminalStatus::Succeeded => NotificationEvent::PartSucceeded {
            field_name,
            declared_filename,
            artifact: artifact.clone(),
        },
        TerminalStatus::Failed(cause) => NotificationEvent::PartFailed {
            field_name,
            declared_filename,
            cause: cause.clone(),
        },
    }
}

fn log_transition(request_id: Uuid, state: SessionState) {
    tracing::debug!(request_id = %request_id, state = ?state, "Session state");
}

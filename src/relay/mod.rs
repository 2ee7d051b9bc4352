//! Stream relay
//!
//! Pipes one file part into a storage destination. The relay reads frames
//! from a bounded channel filled by the session coordinator, so a slow sink
//! makes the coordinator wait on `send`, which in turn stops it polling the
//! request body. Memory per part is bounded by the channel capacity plus the
//! backend's write buffer.
//!
//! # Terminal states
//!
//! | Condition | Status |
//! |-----------|--------|
//! | [`PartFrame::End`] received and the destination closed cleanly | `Succeeded` |
//! | Open, write, flush or close error | `Failed(Storage)` |
//! | [`PartFrame::Abort`] received | `Failed(cause)` |
//! | Channel closed without `End` | `Failed(Transport)` |
//!
//! The destination is always shut down before the relay returns. Partial
//! artifacts are kept unless the relay was built with
//! [`StreamRelay::discard_partial`].

use crate::allocator::StorageName;
use crate::metrics;
use crate::storage::{ArtifactWriter, StorageBackend};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Why a part failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl FailureCause {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            FailureCause::MalformedRequest(_) => "malformed_request",
            FailureCause::Transport(_) => "transport_error",
            FailureCause::Storage(_) => "storage_error",
        }
    }
}

/// One frame of a part's byte stream
#[derive(Debug, Clone)]
pub enum PartFrame {
    /// Next chunk of part content, in wire order
    Data(Bytes),
    /// The part ended cleanly
    End,
    /// The source failed; no more frames follow
    Abort(FailureCause),
}

/// Terminal status of a stored artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Succeeded,
    Failed(FailureCause),
}

/// Result of relaying one part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Allocated storage name
    pub name: StorageName,
    /// Location of the artifact in the backend
    pub path: PathBuf,
    /// Bytes accepted by the destination
    pub size: u64,
    /// Terminal status, never changed after the relay returns
    pub status: TerminalStatus,
}

impl StoredArtifact {
    /// Whether the relay succeeded
    pub fn is_success(&self) -> bool {
        self.status == TerminalStatus::Succeeded
    }

    /// Failure cause, if the relay failed
    pub fn failure(&self) -> Option<&FailureCause> {
        match &self.status {
            TerminalStatus::Failed(cause) => Some(cause),
            TerminalStatus::Succeeded => None,
        }
    }
}

/// Relays file parts into a storage backend
#[derive(Debug, Clone)]
pub struct StreamRelay {
    backend: Arc<dyn StorageBackend>,
    discard_partial: bool,
}

impl StreamRelay {
    /// Create a relay that keeps partial artifacts after failures
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            discard_partial: false,
        }
    }

    /// Remove partial artifacts after failures
    pub fn discard_partial(mut self, discard: bool) -> Self {
        self.discard_partial = discard;
        self
    }

    /// Storage backend this relay writes to
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Whether partial artifacts are removed after failures
    pub fn discards_partial(&self) -> bool {
        self.discard_partial
    }

    /// Relay one part into the artifact `name`
    ///
    /// Returns once the part reached a terminal state. A single attempt is
    /// made; retries belong to the caller.
    #[tracing::instrument(
        name = "relay.part",
        skip(self, source),
        fields(
            storage.name = %name,
            relay.bytes = tracing::field::Empty,
            relay.status = tracing::field::Empty
        )
    )]
    pub async fn run(&self, name: StorageName, source: mpsc::Receiver<PartFrame>) -> StoredArtifact {
        let start = Instant::now();
        let path = self.backend.locate(&name);

        let (size, status) = match self.backend.create(&name).await {
            Ok(sink) => {
                let (size, result) = pipe(source, sink).await;
                match result {
                    Ok(()) => (size, TerminalStatus::Succeeded),
                    Err(cause) => {
                        if self.discard_partial {
                            if let Err(e) = self.backend.discard(&name).await {
                                tracing::warn!(error = %e, "Failed to discard partial artifact");
                            }
                        }
                        (size, TerminalStatus::Failed(cause))
                    }
                }
            }
            // Dropping `source` here tells the coordinator to stop forwarding
            Err(e) => (0, TerminalStatus::Failed(FailureCause::Storage(e.to_string()))),
        };

        let span = tracing::Span::current();
        span.record("relay.bytes", size);
        match &status {
            TerminalStatus::Succeeded => {
                span.record("relay.status", "succeeded");
                metrics::record_part_success(size, start.elapsed().as_secs_f64());
                tracing::info!(path = %path.display(), bytes = size, "Relay finished");
            }
            TerminalStatus::Failed(cause) => {
                span.record("relay.status", cause.kind());
                metrics::record_part_failure(cause.kind());
                tracing::warn!(path = %path.display(), bytes = size, error = %cause, "Relay failed");
            }
        }

        StoredArtifact {
            name,
            path,
            size,
            status,
        }
    }
}

/// Copy frames into `sink` until a terminal frame
///
/// Returns the number of bytes the sink accepted alongside the outcome.
async fn pipe(mut source: mpsc::Receiver<PartFrame>, mut sink: ArtifactWriter) -> (u64, Result<(), FailureCause>) {
    let mut written: u64 = 0;

    loop {
        match source.recv().await {
            Some(PartFrame::Data(chunk)) => {
                if let Err(e) = sink.write_all(&chunk).await {
                    drop(source);
                    close_quietly(&mut sink).await;
                    return (written, Err(FailureCause::Storage(e.to_string())));
                }
                written += chunk.len() as u64;
            }
            Some(PartFrame::End) => {
                // shutdown flushes buffered bytes before closing
                return match sink.shutdown().await {
                    Ok(()) => (written, Ok(())),
                    Err(e) => (written, Err(FailureCause::Storage(e.to_string()))),
                };
            }
            Some(PartFrame::Abort(cause)) => {
                close_quietly(&mut sink).await;
                return (written, Err(cause));
            }
            None => {
                close_quietly(&mut sink).await;
                return (
                    written,
                    Err(FailureCause::Transport(
                        "part stream closed before completion".into(),
                    )),
                );
            }
        }
    }
}

async fn close_quietly(sink: &mut ArtifactWriter) {
    if let Err(e) = sink.shutdown().await {
        tracing::debug!(error = %e, "Error closing failed artifact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::FilenameAllocator;
    use crate::storage::DiskStorage;

    async fn disk_relay(dir: &tempfile::TempDir) -> StreamRelay {
        let storage = DiskStorage::open(dir.path()).await.unwrap();
        StreamRelay::new(Arc::new(storage))
    }

    #[tokio::test]
    async fn test_relay_writes_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let relay = disk_relay(&dir).await;
        let name = FilenameAllocator::new().allocate("ordered.txt", "f");

        let (tx, rx) = mpsc::channel(2);
        let task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(name, rx).await }
        });

        for chunk in ["one,", "two,", "three"] {
            tx.send(PartFrame::Data(Bytes::from(chunk))).await.unwrap();
        }
        tx.send(PartFrame::End).await.unwrap();

        let artifact = task.await.unwrap();
        assert!(artifact.is_success());
        assert_eq!(artifact.size, 13);
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"one,two,three");
    }

    #[tokio::test]
    async fn test_relay_abort_keeps_partial_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let relay = disk_relay(&dir).await;
        let name = FilenameAllocator::new().allocate("partial.bin", "f");

        let (tx, rx) = mpsc::channel(4);
        tx.send(PartFrame::Data(Bytes::from_static(b"half"))).await.unwrap();
        tx.send(PartFrame::Abort(FailureCause::Transport("reset".into())))
            .await
            .unwrap();

        let artifact = relay.run(name, rx).await;
        assert_eq!(
            artifact.failure(),
            Some(&FailureCause::Transport("reset".into()))
        );
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"half");
    }

    #[tokio::test]
    async fn test_relay_discards_partial_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let relay = disk_relay(&dir).await.discard_partial(true);
        let name = FilenameAllocator::new().allocate("partial.bin", "f");

        let (tx, rx) = mpsc::channel(4);
        tx.send(PartFrame::Data(Bytes::from_static(b"half"))).await.unwrap();
        drop(tx);

        let artifact = relay.run(name, rx).await;
        assert!(matches!(
            artifact.failure(),
            Some(FailureCause::Transport(_))
        ));
        assert!(!artifact.path.exists());
    }

    #[tokio::test]
    async fn test_relay_open_failure_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let relay = disk_relay(&dir).await;
        let allocator = FilenameAllocator::new();
        let name = allocator.allocate("dup.txt", "f");
        std::fs::write(relay.backend().locate(&name), b"existing").unwrap();

        let (tx, rx) = mpsc::channel(1);
        let artifact = relay.run(name, rx).await;
        assert!(matches!(artifact.failure(), Some(FailureCause::Storage(_))));
        assert!(tx.is_closed());
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"existing");
    }

    #[test]
    fn test_failure_cause_kind() {
        assert_eq!(FailureCause::Storage("x".into()).kind(), "storage_error");
        assert_eq!(FailureCause::Transport("x".into()).kind(), "transport_error");
        assert_eq!(
            FailureCause::MalformedRequest("x".into()).to_string(),
            "malformed request: x"
        );
    }
}

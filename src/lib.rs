//! Sluice Uploadr Library
//!
//! Streaming multipart upload receiver. File parts are relayed straight from
//! the request body to local storage under collision-free names, and upload
//! lifecycle events are forwarded to a chat notification sink.
//!
//! # Features
//!
//! - **Streaming**: Parts are never buffered whole; memory per part is bounded
//! - **Safe Names**: Client filenames are sanitized and prefixed with a sequence number
//! - **Independent Parts**: One failing part never cancels its siblings
//! - **Notifications**: Telegram Bot API or log output, never on the upload path
//!
//! # Example
//!
//! ```no_run
//! use sluice_uploadr::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod config;
pub mod metrics;
pub mod notify;
pub mod relay;
pub mod server;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use allocator::{FilenameAllocator, StorageName};
pub use config::Config;
pub use relay::{FailureCause, StoredArtifact, StreamRelay};
pub use server::Server;
pub use session::{SessionOutcome, UploadCoordinator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

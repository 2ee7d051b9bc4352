//! Common E2E Test Infrastructure
//!
//! Provides shared utilities for E2E tests:
//! - Test server management
//! - Multipart request helpers

use reqwest::multipart::{Form, Part};
use sluice_uploadr::config::Config;
use sluice_uploadr::server::Server;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// E2E Test Environment
///
/// Owns a running server and its storage root.
pub struct E2ETestEnv {
    pub server_addr: SocketAddr,
    pub client: reqwest::Client,
    storage: tempfile::TempDir,
    _server_handle: tokio::task::JoinHandle<()>,
}

impl E2ETestEnv {
    /// Create a new E2E test environment with a fresh storage root
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_storage(tempfile::tempdir()?).await
    }

    /// Create a test environment serving an existing storage root
    pub async fn with_storage(storage: tempfile::TempDir) -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::default_config(storage.path());
        Self::with_config(config, storage).await
    }

    /// Create a test environment from a prepared configuration
    ///
    /// `config.storage.root` should point into `storage`.
    pub async fn with_config(
        config: Config,
        storage: tempfile::TempDir,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let server = Server::new(config).await?;
        let server_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            let _ = server.serve_until(std::future::pending()).await;
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            server_addr,
            client,
            storage,
            _server_handle: server_handle,
        })
    }

    /// Get the base URL for the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.server_addr)
    }

    /// Storage root used by the server
    pub fn storage_root(&self) -> &Path {
        self.storage.path()
    }

    /// Stop the server and hand back its storage root
    pub fn into_storage(self) -> tempfile::TempDir {
        self._server_handle.abort();
        self.storage
    }

    /// Post a multipart form to the upload path
    pub async fn upload(&self, form: Form) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(format!("{}/upload", self.base_url()))
            .multipart(form)
            .send()
            .await
    }

    /// Artifacts currently in the storage root, sorted by name
    pub fn stored_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.storage_root())
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Default test configuration
    pub fn default_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 0;
        config.storage.root = root.to_path_buf();
        config.storage.idle_timeout_secs = 5;
        config
    }
}

/// Build a file part
pub fn file_part(content: impl Into<Vec<u8>>, filename: &str) -> Part {
    Part::bytes(content.into()).file_name(filename.to_string())
}

/// Stored file names, without directories
pub fn file_names(files: &[PathBuf]) -> Vec<String> {
    files
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect()
}

//! Local disk storage
//!
//! Every artifact is a regular file directly under the storage root. Files
//! are opened with `create_new`, so an existing artifact is never clobbered.

use super::{validate_name, ArtifactWriter, StorageBackend, StorageError};
use crate::allocator::StorageName;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::BufWriter;

/// Default write buffer size per artifact (64KB)
pub const DEFAULT_WRITE_BUFFER: usize = 64 * 1024;

/// Disk-backed storage rooted at a single directory
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
    write_buffer: usize,
}

impl DiskStorage {
    /// Open the storage root, creating it if absent
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        Self::with_write_buffer(root, DEFAULT_WRITE_BUFFER).await
    }

    /// Open the storage root with an explicit per-file write buffer size
    pub async fn with_write_buffer<P: AsRef<Path>>(
        root: P,
        write_buffer: usize,
    ) -> Result<Self, StorageError> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| StorageError::InvalidRoot {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| StorageError::InvalidRoot {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        let metadata = tokio::fs::metadata(&root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::InvalidRoot {
                path: root,
                reason: "not a directory".into(),
            });
        }

        Ok(Self {
            root,
            write_buffer: write_buffer.max(1),
        })
    }

    /// Canonical storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Highest allocator sequence number present in the storage root
    pub async fn highest_sequence(&self) -> Result<Option<u64>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        Ok(super::highest_sequence(names.iter().map(String::as_str)))
    }
}

#[async_trait]
impl StorageBackend for DiskStorage {
    async fn create(&self, name: &StorageName) -> Result<ArtifactWriter, StorageError> {
        validate_name(name)?;
        let path = self.locate(name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::AlreadyExists(name.to_string()),
                _ => StorageError::IoError(e),
            })?;

        tracing::debug!(path = %path.display(), "Created artifact");

        Ok(Box::pin(BufWriter::with_capacity(self.write_buffer, file)))
    }

    fn locate(&self, name: &StorageName) -> PathBuf {
        self.root.join(name.as_str())
    }

    async fn discard(&self, name: &StorageName) -> Result<(), StorageError> {
        validate_name(name)?;
        match tokio::fs::remove_file(self.locate(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

//! Storage backends
//!
//! A storage backend hands out write destinations for allocated
//! [`StorageName`]s. The relay only sees an [`ArtifactWriter`], so tests and
//! alternative backends can plug in without touching the upload pipeline.

use crate::allocator::{parse_sequence, StorageName};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncWrite;

pub mod disk;

pub use disk::DiskStorage;

/// Write destination for one stored artifact
pub type ArtifactWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid storage root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("Rejected storage name: {0}")]
    InvalidName(String),

    #[error("Artifact already exists: {0}")]
    AlreadyExists(String),
}

/// Storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Open a fresh write destination for `name`
    ///
    /// Must fail rather than overwrite an existing artifact.
    async fn create(&self, name: &StorageName) -> Result<ArtifactWriter, StorageError>;

    /// Location of the artifact for `name`
    fn locate(&self, name: &StorageName) -> PathBuf;

    /// Remove the artifact for `name`, if present
    async fn discard(&self, name: &StorageName) -> Result<(), StorageError>;
}

/// Check that a storage name is exactly one normal path component
pub fn validate_name(name: &StorageName) -> Result<(), StorageError> {
    let mut components = Path::new(name.as_str()).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StorageError::InvalidName(name.to_string())),
    }
}

/// Highest allocator sequence number among `names`
pub fn highest_sequence<'a, I>(names: I) -> Option<u64>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().filter_map(parse_sequence).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::FilenameAllocator;

    #[test]
    fn test_allocated_names_validate() {
        let allocator = FilenameAllocator::new();
        for raw in ["../../x", "..", "/", "a/b/c.txt", "Web Data"] {
            let name = allocator.allocate(raw, raw);
            assert!(validate_name(&name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_highest_sequence() {
        let names = ["3-a-b", "notes.txt", "12-c.bin", "7"];
        assert_eq!(highest_sequence(names), Some(12));
        assert_eq!(highest_sequence(["readme"]), None);
    }
}

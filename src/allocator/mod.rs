//! Filename allocation
//!
//! Turns client-declared filenames into storage names that are safe to join
//! onto the storage root and unique for the lifetime of the process.
//!
//! # Naming scheme
//!
//! ```text
//! {seq}-{stem}-{field}{ext}
//! ```
//!
//! Empty components are omitted, so the worst case is a bare `{seq}`. The
//! sequence number always comes first and never contains `-`, which makes the
//! prefix before the first `-` unique per allocation regardless of what the
//! client sent.
//!
//! # Example
//!
//! ```
//! use sluice_uploadr::allocator::FilenameAllocator;
//!
//! let allocator = FilenameAllocator::new();
//! let name = allocator.allocate("Web Data", "doc");
//! assert_eq!(name.as_str(), "0-Web_Data-doc");
//!
//! let name = allocator.allocate("../../etc/passwd", "f");
//! assert_eq!(name.as_str(), "1-passwd-f");
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Maximum length of a single sanitized name component
pub const MAX_COMPONENT_LEN: usize = 96;

/// Maximum length of a preserved file extension (without the dot)
const MAX_EXTENSION_LEN: usize = 16;

/// A sanitized, allocated storage name
///
/// Always a single path component: no separators, no `.`/`..`, no control
/// characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageName(String);

impl StorageName {
    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number this name was allocated with
    pub fn sequence(&self) -> Option<u64> {
        parse_sequence(&self.0)
    }
}

impl fmt::Display for StorageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Process-wide filename allocator
///
/// Owns the sequence counter. Share it behind an `Arc`; every call to
/// [`allocate`](Self::allocate) draws exactly one sequence value.
#[derive(Debug, Default)]
pub struct FilenameAllocator {
    next: AtomicU64,
}

impl FilenameAllocator {
    /// Create an allocator whose first sequence number is 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create an allocator whose first sequence number is `first`
    ///
    /// Used at startup to skip past names left in the storage root by an
    /// earlier run.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Sequence number the next allocation will receive
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Allocate a storage name for a file part
    ///
    /// Never fails. Untrusted input is reduced to its last path segment and
    /// restricted to `[A-Za-z0-9._-]`.
    pub fn allocate(&self, declared_filename: &str, field_name: &str) -> StorageName {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);

        let declared = sanitize_component(declared_filename);
        let (stem, ext) = split_extension(&declared);
        let field = sanitize_component(field_name);

        let mut name = seq.to_string();
        for component in [stem, field.as_str()] {
            if !component.is_empty() {
                name.push('-');
                name.push_str(component);
            }
        }
        if let Some(ext) = ext {
            name.push('.');
            name.push_str(ext);
        }

        StorageName(name)
    }
}

/// Reduce an untrusted string to a safe single filename component
///
/// The result may be empty. It never contains path separators, control
/// characters, `..`, or leading/trailing dots.
pub fn sanitize_component(raw: &str) -> String {
    let last_segment = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut out = String::with_capacity(last_segment.len().min(MAX_COMPONENT_LEN));
    let mut previous_dot = false;

    for c in last_segment.chars() {
        if c.is_control() {
            continue;
        }

        let mapped = if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
            c
        } else {
            '_'
        };

        if mapped == '.' {
            if previous_dot {
                continue;
            }
            previous_dot = true;
        } else {
            previous_dot = false;
        }

        out.push(mapped);
    }

    let trimmed = out.trim_matches(|c: char| c == '.' || c == '_' || c == '-');
    let mut result: String = trimmed.chars().take(MAX_COMPONENT_LEN).collect();

    // Truncation can expose a trailing dot again
    while result.ends_with('.') {
        result.pop();
    }

    result
}

/// Split a sanitized name into stem and extension
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext))
        }
        _ => (name, None),
    }
}

/// Parse the sequence prefix of an allocated name
///
/// Returns `None` for names not produced by this allocator.
pub fn parse_sequence(name: &str) -> Option<u64> {
    let prefix = match name.split_once(['-', '.']) {
        Some((prefix, _)) => prefix,
        None => name,
    };

    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    prefix.parse().ok()
}

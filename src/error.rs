//! Error types for the identity store
//!
//! Benign kinds (`AlreadyExists`, `NotFound`) are only ever produced or
//! suppressed at the call sites that expect them; everything else bubbles up
//! to the per-account retry loop.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for identity store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in identity store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A create-only operation found its target already present
    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The target of a lookup or delete is absent
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// An index already resolves to a different identity
    #[error("index {} points to {} instead of {}", .index.display(), .found.display(), .expected.display())]
    Conflict {
        index: PathBuf,
        expected: PathBuf,
        found: PathBuf,
    },

    /// Any other filesystem failure
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An identifier that cannot be used as a single path component
    #[error("invalid identifier: {0:?}")]
    InvalidName(String),

    /// A record could not be parsed
    #[error("invalid record {}: {source}", .path.display())]
    InvalidRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Wrap an `io::Error`, classifying the benign kinds
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(path),
            io::ErrorKind::NotFound => StoreError::NotFound(path),
            _ => StoreError::Io { path, source },
        }
    }

    /// Conflicts and bad identifiers are surfaced immediately, everything
    /// else goes through the retry budget
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::Conflict { .. } | StoreError::InvalidName(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

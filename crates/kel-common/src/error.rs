//! Error types for KEL

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for KEL operations
pub type Result<T> = std::result::Result<T, KelError>;

/// Main error type for KEL
#[derive(Error, Debug)]
pub enum KelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at '{}': {source}", .path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Insufficient disk space: {0}")]
    DiskSpace(String),

    #[error("Packaging error: {0}")]
    Packaging(String),

    #[error("Archive entry escapes target directory: {0}")]
    PathTraversal(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Manifest validation failed: {0}")]
    ManifestInvalid(String),

    #[error("Mover failed: {0:#}")]
    Mover(anyhow::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(u64),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Batch already published at '{}'", .0.display())]
    BatchExists(PathBuf),
}

impl KelError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a packaging error
    pub fn packaging(msg: impl Into<String>) -> Self {
        Self::Packaging(msg.into())
    }

    /// Create a crypto error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// Wrap an I/O error with the path it happened on
    pub fn io_at(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether a whole pipeline attempt failing with this error may be retried.
    ///
    /// Configuration, integrity and interruption errors are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            KelError::Config(_)
                | KelError::ManifestInvalid(_)
                | KelError::PathTraversal(_)
                | KelError::ChecksumMismatch { .. }
                | KelError::Interrupted(_)
                | KelError::BatchExists(_)
        )
    }
}

/// Attach a path to bare `std::io::Error`s.
pub trait IoResultExt<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| KelError::io_at(path, e))
    }
}

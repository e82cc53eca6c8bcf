//! Error types for KEL CLI
//!
//! Engine errors are wrapped with a hint on what to check next.

use kel_common::KelError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Job or global configuration is missing or invalid
    #[error("Configuration error: {0}. Check global.yaml and the job files under the configuration directory (--conf-dir / KEL_CONF_DIR).")]
    Config(String),

    /// CLI settings could not be assembled
    #[error("Invalid CLI settings: {0}. Check kel.yaml and KEL_* environment variables.")]
    Settings(#[from] config::ConfigError),

    /// No job file with this name
    #[error("Job '{0}' not found. Run 'kel jobs' to list configured jobs.")]
    JobNotFound(String),

    /// Job exists but is of the other kind
    #[error("Job '{job}' is a {actual} job. Use 'kel {actual} {job}' instead.")]
    WrongJobKind { job: String, actual: String },

    /// A package or directory does not match its manifest
    #[error("Verification failed for '{0}'. The package may be incomplete or corrupted; request a fresh transfer.")]
    VerificationFailed(String),

    /// Not enough free disk space for the run
    #[error("{0}. Free up space or adjust disk_protection in the job settings.")]
    DiskSpace(String),

    /// Any other engine failure
    #[error("Task failed: {0}")]
    Engine(KelError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<KelError> for CliError {
    fn from(err: KelError) -> Self {
        match err {
            KelError::Config(msg) => Self::Config(msg),
            KelError::DiskSpace(msg) => Self::DiskSpace(format!("Insufficient disk space: {msg}")),
            KelError::ManifestInvalid(msg) => Self::VerificationFailed(msg),
            other => Self::Engine(other),
        }
    }
}

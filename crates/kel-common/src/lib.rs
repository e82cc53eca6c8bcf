//! KEL Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error type, logging bootstrap, and integrity primitives for the KEL
//! extract/load workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`KelError`] and the [`Result`] alias used by every engine operation
//! - **Checksums**: streaming SM3 digests for manifests and package validation
//! - **Logging**: `tracing` subscriber setup for the kel binary, see [`logging::LogConfig`]
//! - **Types**: byte-size helpers shared by the disk gate and the packaging code
//!
//! # Example
//!
//! ```no_run
//! use kel_common::{checksum, Result};
//!
//! fn digest(path: &str) -> Result<()> {
//!     let sm3 = checksum::compute_file_checksum(path)?;
//!     println!("{path}: {sm3}");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{IoResultExt, KelError, Result};

//! SM3 checksum utilities for file verification
//!
//! Digests are computed in a single forward pass over a fixed-size buffer, so
//! memory use does not depend on file size. Output is lowercase hex.

use crate::error::{IoResultExt, KelError, Result};
use sm3::{Digest, Sm3};
use std::io::Read;
use std::path::Path;

/// Read buffer used by every streaming digest
pub const BUFFER_SIZE: usize = 8192;

/// Size and SM3 digest of a file on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub size: u64,
    pub sm3: String,
}

impl FileDigest {
    /// Stat and hash `path`
    pub fn of(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let size = std::fs::metadata(path).at_path(path)?.len();
        let sm3 = compute_file_checksum(path)?;
        Ok(Self { size, sm3 })
    }
}

/// Compute the SM3 checksum of a file
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).at_path(path)?;
    compute_checksum(&mut file).map_err(|e| match e {
        KelError::Io(source) => KelError::io_at(path, source),
        other => other,
    })
}

/// Compute the SM3 checksum of any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sm3::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Raw SM3 digest of an in-memory byte slice
pub fn sm3_digest(data: &[u8]) -> [u8; 32] {
    Sm3::digest(data).into()
}

/// Verify the SM3 checksum of a file
pub fn verify_file_checksum(path: impl AsRef<Path>, expected: &str) -> Result<bool> {
    let path = path.as_ref();
    let actual = compute_file_checksum(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        Err(KelError::ChecksumMismatch {
            path: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

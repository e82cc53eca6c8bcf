//! Batch manifest: inventory of data files (and published package files)
//! with sizes and SM3 digests.

use crate::context::TaskExecutionContext;
use crate::delivery::Delivery;
use crate::fs::safe_join;
use chrono::Local;
use kel_common::checksum::FileDigest;
use kel_common::{IoResultExt, KelError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub version: String,
    pub job_name: String,
    pub batch_number: String,
    /// RFC 3339 with offset
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionInfo>,
    #[serde(default)]
    pub files: Vec<FileInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub splits: Vec<SplitInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_threshold_gb: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub enabled: bool,
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// `/`-separated path relative to the manifest's directory
    pub name: String,
    pub size: u64,
    pub sm3: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitInfo {
    pub name: String,
    pub size: u64,
    pub sm3: String,
    /// 1-based
    pub index: u32,
}

/// Describe the files exported into `work_dir` for `ctx`.
pub fn generate(ctx: &TaskExecutionContext, work_dir: &Path) -> Result<ManifestMetadata> {
    let config = ctx.config();
    let mut files = Vec::with_capacity(ctx.attributes.exported_files.len());
    for exported in &ctx.attributes.exported_files {
        let path = safe_join(work_dir, Path::new(&exported.name))?;
        let digest = FileDigest::of(&path)?;
        files.push(FileInfo {
            name: exported.name.clone(),
            size: digest.size,
            sm3: digest.sm3,
            table_name: exported.table_name.clone(),
            row_count: exported.row_count,
        });
    }

    Ok(ManifestMetadata {
        version: MANIFEST_VERSION.to_string(),
        job_name: ctx.job_name().to_string(),
        batch_number: ctx.batch_number().to_string(),
        timestamp: Local::now().to_rfc3339(),
        compression: Some(CompressionInfo {
            algorithm: config.global.compression.algorithm.clone(),
            split_threshold_gb: config.split_threshold_gb(),
        }),
        encryption: Some(EncryptionInfo {
            enabled: config.encryption_enabled(),
            algorithm: "SM4".to_string(),
        }),
        files,
        splits: Vec::new(),
    })
}

/// Record the published package files, in order, with 1-based indexes.
pub fn add_split_info(manifest: &mut ManifestMetadata, parts: &[PathBuf]) -> Result<()> {
    manifest.splits.clear();
    for (index, part) in (1u32..).zip(parts) {
        let name = part
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| KelError::packaging(format!("bad package path {}", part.display())))?;
        let digest = FileDigest::of(part)?;
        manifest.splits.push(SplitInfo {
            name,
            size: digest.size,
            sm3: digest.sm3,
            index,
        });
    }
    Ok(())
}

/// Write `manifest` as pretty JSON, atomically.
pub fn write(manifest: &ManifestMetadata, path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest)?;
    let delivery = Delivery::begin(path)?;
    fs::write(delivery.tmp_path(), json).at_path(delivery.tmp_path())?;
    delivery.complete()?;
    debug!(path = %path.display(), files = manifest.files.len(), "Manifest written");
    Ok(())
}

pub fn parse(path: &Path) -> Result<ManifestMetadata> {
    let content = fs::read(path).at_path(path)?;
    serde_json::from_slice(&content)
        .map_err(|e| KelError::ManifestInvalid(format!("{}: {e}", path.display())))
}

/// Check every listed data file under `dir`: presence, then size, then SM3.
///
/// Every mismatch is logged; an empty list is valid.
pub fn validate(manifest: &ManifestMetadata, dir: &Path) -> bool {
    let mut ok = true;
    for file in &manifest.files {
        if let Err(reason) = check_entry(dir, &file.name, file.size, &file.sm3) {
            warn!(file = %file.name, "{reason}");
            ok = false;
        }
    }
    ok
}

/// Like [`validate`] for the package files listed in `splits`.
pub fn validate_splits(manifest: &ManifestMetadata, dir: &Path) -> bool {
    let mut ok = true;
    for (expected, split) in (1u32..).zip(&manifest.splits) {
        if split.index != expected {
            warn!(file = %split.name, index = split.index, expected, "Package index out of order");
            ok = false;
        }
        if let Err(reason) = check_entry(dir, &split.name, split.size, &split.sm3) {
            warn!(file = %split.name, "{reason}");
            ok = false;
        }
    }
    ok
}

fn check_entry(dir: &Path, name: &str, size: u64, sm3: &str) -> std::result::Result<(), String> {
    let path = safe_join(dir, Path::new(name)).map_err(|e| e.to_string())?;
    if !path.is_file() {
        return Err("listed file is missing".to_string());
    }
    let digest = FileDigest::of(&path).map_err(|e| e.to_string())?;
    if digest.size != size {
        return Err(format!("size mismatch: expected {size}, got {}", digest.size));
    }
    if !digest.sm3.eq_ignore_ascii_case(sm3) {
        return Err(format!("SM3 mismatch: expected {sm3}, got {}", digest.sm3));
    }
    Ok(())
}

//! `kel verify` command implementation
//!
//! A directory holding `splits` (a published package) is checked shard by
//! shard; otherwise every listed data file is checked.

use crate::error::{CliError, Result};
use colored::Colorize;
use kel_engine::manifest::{self, MANIFEST_FILE};
use std::path::Path;

pub async fn run(dir: &Path) -> Result<()> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let batch_manifest = manifest::parse(&manifest_path)?;

    let (ok, checked, what) = if batch_manifest.splits.is_empty() {
        (
            manifest::validate(&batch_manifest, dir),
            batch_manifest.files.len(),
            "data files",
        )
    } else {
        (
            manifest::validate_splits(&batch_manifest, dir),
            batch_manifest.splits.len(),
            "package files",
        )
    };

    println!("  Job:   {}", batch_manifest.job_name);
    println!("  Batch: {}", batch_manifest.batch_number);
    if !ok {
        return Err(CliError::VerificationFailed(dir.display().to_string()));
    }
    println!("{} {checked} {what} match {}", "✓".green().bold(), manifest_path.display());
    Ok(())
}

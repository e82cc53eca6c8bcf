//! `kel checksum` command implementation

use crate::error::Result;
use kel_common::checksum::FileDigest;
use std::path::PathBuf;

/// Print `<sm3>  <path>` for each file, like `sha256sum`
pub async fn run(files: &[PathBuf]) -> Result<()> {
    for file in files {
        let digest = FileDigest::of(file)?;
        println!("{}  {}", digest.sm3, file.display());
    }
    Ok(())
}

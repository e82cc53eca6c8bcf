//! Atomic publication: write to `<target>.tmp`, then rename into place.
//!
//! A consumer watching the target directory never sees a partial file.

use kel_common::{IoResultExt, KelError, Result};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const TEMP_SUFFIX: &str = ".tmp";

/// `<target>.tmp`
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Prepare to write `target`: create its parent and drop any stale temp file.
pub fn begin_delivery(target: &Path) -> Result<PathBuf> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).at_path(parent)?;
    }
    let tmp = temp_path(target);
    if tmp.exists() {
        debug!(path = %tmp.display(), "Removing stale temp file");
        fs::remove_file(&tmp).at_path(&tmp)?;
    }
    Ok(tmp)
}

/// Replace `target` with its temp file.
pub fn complete_delivery(target: &Path) -> Result<()> {
    let tmp = temp_path(target);
    if !tmp.exists() {
        return Err(KelError::io_at(
            &tmp,
            io::Error::new(io::ErrorKind::NotFound, "temporary file not found"),
        ));
    }
    if target.exists() {
        fs::remove_file(target).at_path(target)?;
    }
    fs::rename(&tmp, target).at_path(target)?;
    debug!(path = %target.display(), "Delivered");
    Ok(())
}

/// Remove the temp file of `target`, if any. Never fails.
pub fn cancel_delivery(target: &Path) {
    let tmp = temp_path(target);
    if tmp.exists() {
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(path = %tmp.display(), error = %e, "Could not remove temp file");
        }
    }
}

/// A delivery in progress; cancelled on drop unless completed.
#[derive(Debug)]
pub struct Delivery {
    target: PathBuf,
    tmp: PathBuf,
    completed: bool,
}

impl Delivery {
    pub fn begin(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();
        let tmp = begin_delivery(&target)?;
        Ok(Self {
            target,
            tmp,
            completed: false,
        })
    }

    /// Where the content must be written
    pub fn tmp_path(&self) -> &Path {
        &self.tmp
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn complete(mut self) -> Result<PathBuf> {
        complete_delivery(&self.target)?;
        self.completed = true;
        Ok(self.target.clone())
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.completed {
            cancel_delivery(&self.target);
        }
    }
}

/// Copy `source` to `target` atomically.
pub fn deliver_file(source: &Path, target: &Path) -> Result<()> {
    let delivery = Delivery::begin(target)?;
    fs::copy(source, delivery.tmp_path()).at_path(source)?;
    delivery.complete()?;
    Ok(())
}

/// Move `source` to `target` atomically.
pub fn deliver_file_by_move(source: &Path, target: &Path) -> Result<()> {
    let delivery = Delivery::begin(target)?;
    crate::fs::move_file(source, delivery.tmp_path())?;
    delivery.complete()?;
    Ok(())
}

/// Deliver every regular file in `source_dir` whose name matches `pattern`.
pub fn deliver_files(source_dir: &Path, target_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let mut delivered = Vec::new();
    for source in crate::fs::list_files(source_dir, pattern)? {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = target_dir.join(name);
        deliver_file(&source, &target)?;
        delivered.push(target);
    }
    info!(
        count = delivered.len(),
        target = %target_dir.display(),
        "Delivered files"
    );
    Ok(delivered)
}

/// Remove leftover `*.tmp` files directly under `dir`; returns how many.
pub fn cleanup_temp_files(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for tmp in crate::fs::list_files(dir, &format!("*{TEMP_SUFFIX}"))? {
        match fs::remove_file(&tmp) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %tmp.display(), error = %e, "Could not remove temp file"),
        }
    }
    Ok(removed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_begin_creates_parent_and_clears_stale_tmp() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out/batch/data.tar.gz");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(temp_path(&target), b"stale").unwrap();

        let tmp = begin_delivery(&target).unwrap();
        assert_eq!(tmp, dir.path().join("out/batch/data.tar.gz.tmp"));
        assert!(!tmp.exists());
        assert!(target.parent().unwrap().is_dir());
    }

    #[test]
    fn test_complete_replaces_existing_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.txt");
        fs::write(&target, b"old").unwrap();

        let delivery = Delivery::begin(&target).unwrap();
        fs::write(delivery.tmp_path(), b"new").unwrap();
        delivery.complete().unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!temp_path(&target).exists());
    }

    #[test]
    fn test_complete_without_tmp_fails() {
        let dir = TempDir::new().unwrap();
        assert!(complete_delivery(&dir.path().join("ghost")).is_err());
    }

    #[test]
    fn test_dropped_delivery_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.txt");
        {
            let delivery = Delivery::begin(&target).unwrap();
            fs::write(delivery.tmp_path(), b"half").unwrap();
        }
        assert!(!target.exists());
        assert!(!temp_path(&target).exists());
        cancel_delivery(&target);
    }

    #[test]
    fn test_deliver_files_by_pattern() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::write(src.path().join("a.csv"), b"1").unwrap();
        fs::write(src.path().join("b.csv"), b"2").unwrap();
        fs::write(src.path().join("c.log"), b"3").unwrap();

        let delivered = deliver_files(src.path(), dst.path(), "*.csv").unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(dst.path().join("a.csv").exists());
        assert!(!dst.path().join("c.log").exists());
    }

    #[test]
    fn test_deliver_by_move_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.bin");
        fs::write(&source, b"payload").unwrap();
        let target = dir.path().join("out/dst.bin");

        deliver_file_by_move(&source, &target).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"payload");

        fs::write(dir.path().join("x.tmp"), b"").unwrap();
        fs::write(dir.path().join("y.tmp"), b"").unwrap();
        assert_eq!(cleanup_temp_files(dir.path()).unwrap(), 2);
    }
}

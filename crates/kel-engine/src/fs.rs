//! Filesystem helpers

use glob::Pattern;
use kel_common::{IoResultExt, KelError, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).at_path(dir)
}

/// Remove `dir` and everything below it; a missing directory is fine.
pub fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KelError::io_at(dir, e)),
    }
}

/// Copy a file, creating the target's parent directories.
pub fn copy_file(source: &Path, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(source, target).at_path(source)
}

/// Rename, falling back to copy and delete across filesystems.
pub fn move_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        ensure_dir(parent)?;
    }
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target).at_path(source)?;
    fs::remove_file(source).at_path(source)
}

pub fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| KelError::config(format!("invalid file pattern '{pattern}': {e}")))
}

/// Regular files directly under `dir` whose name matches `pattern`, sorted.
pub fn list_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = compile_pattern(pattern)?;
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).at_path(dir)? {
        let entry = entry.at_path(dir)?;
        if !entry.file_type().at_path(entry.path())?.is_file() {
            continue;
        }
        if pattern.matches(&entry.file_name().to_string_lossy()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Regular files anywhere below `root` whose name matches `pattern`, sorted.
pub fn scan_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = compile_pattern(pattern)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_file() && pattern.matches(&entry.file_name().to_string_lossy()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Total size of the regular files below `root`
pub fn dir_size(root: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(|e| walk_error(root, e))?.len();
        }
    }
    Ok(total)
}

/// `path` relative to `base` with `/` separators
pub fn relative_name(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Join an untrusted relative path onto `base`.
///
/// Absolute paths and `..` components that climb out of `base` are rejected.
pub fn safe_join(base: &Path, relative: &Path) -> Result<PathBuf> {
    let mut joined = base.to_path_buf();
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => {
                joined.pop();
                depth -= 1;
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(KelError::PathTraversal(relative.display().to_string()));
            }
        }
    }
    if depth == 0 {
        return Err(KelError::PathTraversal(relative.display().to_string()));
    }
    Ok(joined)
}

fn walk_error(root: &Path, e: walkdir::Error) -> KelError {
    let path = e.path().unwrap_or(root).to_path_buf();
    match e.into_io_error() {
        Some(io) => KelError::io_at(path, io),
        None => KelError::packaging(format!("filesystem loop below {}", root.display())),
    }
}

//! Unstructured file movers

use super::Mover;
use crate::config::{FileSelection, JobType};
use crate::context::{ExportedFile, FileMapping, TaskExecutionContext};
use crate::fs::{copy_file, ensure_dir, relative_name, safe_join, scan_files};
use anyhow::Context;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Directory under the batch work directory holding copied files
pub const FILES_DIR: &str = "files";

const SECS_PER_DAY: u64 = 24 * 3600;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Copies matching files from the job's source tree into `files/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileExtractMover;

impl Mover for FileExtractMover {
    fn name(&self) -> &str {
        "file-extract"
    }

    fn supports(&self, ctx: &TaskExecutionContext) -> bool {
        ctx.job_type() == JobType::FileExtract
    }

    fn run(&self, ctx: &mut TaskExecutionContext) -> anyhow::Result<()> {
        let Some(root) = ctx.config().extract_source_dir().map(Path::to_path_buf) else {
            warn!(job = ctx.job_name(), "No resources.extract_dir.extract_dir, nothing to collect");
            return Ok(());
        };
        if !root.is_dir() {
            warn!(job = ctx.job_name(), root = %root.display(), "Extract directory missing");
            return Ok(());
        }
        let selections: Vec<FileSelection> = ctx
            .config()
            .job
            .extract_tasks()
            .map(|t| t.files.clone().unwrap_or_default())
            .collect();
        if selections.is_empty() {
            info!(job = ctx.job_name(), "No extract tasks configured");
            return Ok(());
        }

        let files_dir = ctx.work_dir().join(FILES_DIR);
        ensure_dir(&files_dir)?;
        let now = SystemTime::now();
        let mut copied = BTreeSet::new();

        for selection in &selections {
            let pattern = selection.pattern.as_deref().unwrap_or("*");
            let candidates = scan_files(&root, pattern)?;
            let cutoff = time_cutoff(selection.time_range.as_deref(), now);
            let size_limit = selection
                .size_limit_mb
                .filter(|mb| *mb > 0)
                .map(|mb| mb * BYTES_PER_MB);

            let mut matched = 0;
            for file in &candidates {
                let meta = std::fs::metadata(file)
                    .with_context(|| format!("stat {}", file.display()))?;
                if let Some(cutoff) = cutoff {
                    if meta.modified().is_ok_and(|m| m < cutoff) {
                        continue;
                    }
                }
                if size_limit.is_some_and(|limit| meta.len() > limit) {
                    continue;
                }
                let Some(relative) = relative_name(&root, file) else {
                    continue;
                };
                matched += 1;
                if !copied.insert(relative.clone()) {
                    continue;
                }
                let target = safe_join(&files_dir, Path::new(&relative))?;
                copy_file(file, &target)?;
            }
            info!(
                job = ctx.job_name(),
                pattern,
                candidates = candidates.len(),
                matched,
                "Collected files"
            );
        }

        ctx.attributes
            .exported_files
            .extend(copied.into_iter().map(|relative| ExportedFile {
                name: format!("{FILES_DIR}/{relative}"),
                table_name: None,
                row_count: None,
            }));
        Ok(())
    }
}

/// Copies the unpacked `files/` tree into the job's target directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoadMover;

impl Mover for FileLoadMover {
    fn name(&self) -> &str {
        "file-load"
    }

    fn supports(&self, ctx: &TaskExecutionContext) -> bool {
        ctx.job_type() == JobType::FileLoad
    }

    fn run(&self, ctx: &mut TaskExecutionContext) -> anyhow::Result<()> {
        let target_root = ctx
            .config()
            .target_dir()
            .map(Path::to_path_buf)
            .context("resources.load_dir.target_dir is not set")?;
        let files_dir = ctx.work_dir().join(FILES_DIR);
        if !files_dir.is_dir() {
            warn!(job = ctx.job_name(), dir = %files_dir.display(), "Package has no files/ directory");
            return Ok(());
        }
        ensure_dir(&target_root)?;

        for source in scan_files(&files_dir, "*")? {
            let Some(relative) = relative_name(&files_dir, &source) else {
                continue;
            };
            let target = safe_join(&target_root, Path::new(&relative))?;
            copy_file(&source, &target)?;
            ctx.attributes.file_mappings.push(FileMapping {
                source: std::path::absolute(&source).unwrap_or(source),
                target: std::path::absolute(&target).unwrap_or(target),
            });
        }
        info!(
            job = ctx.job_name(),
            files = ctx.attributes.file_mappings.len(),
            target = %target_root.display(),
            "Restored files"
        );
        Ok(())
    }
}

/// Modification-time cutoff for `LAST_<N>_DAY`; unparsable counts mean one day.
fn time_cutoff(range: Option<&str>, now: SystemTime) -> Option<SystemTime> {
    let days = range?
        .strip_prefix("LAST_")?
        .strip_suffix("_DAY")?
        .parse::<u64>()
        .unwrap_or(1);
    now.checked_sub(Duration::from_secs(days * SECS_PER_DAY))
}

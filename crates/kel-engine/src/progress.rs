//! Stage-weighted overall progress

use crate::store::TaskStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A pipeline stage owning a slice of the 0-100 progress range
pub trait Stage: Copy {
    fn name(&self) -> &'static str;

    /// `(start, end)` percentages
    fn range(&self) -> (u8, u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStage {
    Init,
    DiskCheck,
    Export,
    Manifest,
    Compress,
    Encrypt,
    Deliver,
    Finalize,
}

impl Stage for ExtractStage {
    fn name(&self) -> &'static str {
        match self {
            ExtractStage::Init => "INIT",
            ExtractStage::DiskCheck => "DISK_CHECK",
            ExtractStage::Export => "EXPORT",
            ExtractStage::Manifest => "MANIFEST",
            ExtractStage::Compress => "COMPRESS",
            ExtractStage::Encrypt => "ENCRYPT",
            ExtractStage::Deliver => "DELIVER",
            ExtractStage::Finalize => "FINALIZE",
        }
    }

    fn range(&self) -> (u8, u8) {
        match self {
            ExtractStage::Init => (0, 5),
            ExtractStage::DiskCheck => (5, 10),
            ExtractStage::Export => (10, 50),
            ExtractStage::Manifest => (50, 60),
            ExtractStage::Compress => (60, 80),
            ExtractStage::Encrypt => (80, 90),
            ExtractStage::Deliver => (90, 95),
            ExtractStage::Finalize => (95, 100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Init,
    DiskCheck,
    Decrypt,
    Unpack,
    Validate,
    Load,
    Finalize,
}

impl Stage for LoadStage {
    fn name(&self) -> &'static str {
        match self {
            LoadStage::Init => "INIT",
            LoadStage::DiskCheck => "DISK_CHECK",
            LoadStage::Decrypt => "DECRYPT",
            LoadStage::Unpack => "UNPACK",
            LoadStage::Validate => "VALIDATE",
            LoadStage::Load => "LOAD",
            LoadStage::Finalize => "FINALIZE",
        }
    }

    fn range(&self) -> (u8, u8) {
        match self {
            LoadStage::Init => (0, 5),
            LoadStage::DiskCheck => (5, 10),
            LoadStage::Decrypt => (10, 20),
            LoadStage::Unpack => (20, 40),
            LoadStage::Validate => (40, 50),
            LoadStage::Load => (50, 90),
            LoadStage::Finalize => (90, 100),
        }
    }
}

/// `start + (end - start) * local / 100`, clamped to 0-100
pub fn overall_progress(stage: impl Stage, local: u32) -> u8 {
    let (start, end) = stage.range();
    let (start, end) = (u32::from(start), u32::from(end));
    let span = end.saturating_sub(start);
    let value = start + span * local.min(100) / 100;
    value.min(100) as u8
}

/// Snapshot used by progress displays
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    pub stage: String,
    pub progress: u8,
    pub elapsed: Duration,
    pub estimated_remaining: Option<Duration>,
}

/// Estimate the time left from elapsed time and overall progress.
pub fn estimate_remaining(elapsed: Duration, progress: u8) -> Option<Duration> {
    if progress == 0 || progress >= 100 {
        return None;
    }
    let total = elapsed.as_millis() * 100 / u128::from(progress);
    let remaining = total.saturating_sub(elapsed.as_millis());
    Some(Duration::from_millis(u64::try_from(remaining).unwrap_or(u64::MAX)))
}

#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn TaskStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Record `local` percent of `stage` as the task's overall progress.
    pub fn update(&self, task_id: u64, stage: impl Stage, local: u32) -> u8 {
        let progress = overall_progress(stage, local);
        self.set(task_id, stage.name(), progress);
        progress
    }

    /// Set an explicit overall percentage.
    pub fn set(&self, task_id: u64, stage: &str, progress: u8) {
        let progress = progress.min(100);
        let result = self.store.update(task_id, &mut |record| {
            record.progress = progress;
            record.current_stage = stage.to_string();
        });
        if let Err(e) = result {
            debug!(task_id, error = %e, "Progress update dropped");
        }
    }

    pub fn reset(&self, task_id: u64) {
        self.set(task_id, "INIT", 0);
    }

    pub fn progress_info(&self, task_id: u64) -> Option<ProgressInfo> {
        let record = self.store.find_by_id(task_id)?;
        let elapsed = record
            .start_time
            .map(|start| {
                let end = record.end_time.unwrap_or_else(Utc::now);
                (end - start).to_std().unwrap_or_default()
            })
            .unwrap_or_default();
        Some(ProgressInfo {
            stage: record.current_stage,
            progress: record.progress,
            elapsed,
            estimated_remaining: estimate_remaining(elapsed, record.progress),
        })
    }
}

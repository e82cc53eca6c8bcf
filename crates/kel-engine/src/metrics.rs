//! Per-run statistics: stage timings, row counts, archive sizes

use crate::store::TaskStore;
use chrono::{DateTime, Utc};
use kel_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: Option<StageStatus>,
    pub message: Option<String>,
}

/// Statistics of one pipeline attempt.
///
/// Owned by the run that produces it and persisted to the task record at the
/// end of the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub task_id: u64,
    pub batch_number: String,
    pub started_at: DateTime<Utc>,
    pub table_row_counts: BTreeMap<String, u64>,
    pub total_tables: usize,
    pub total_rows: u64,
    pub total_files: usize,
    pub total_file_size: u64,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: f64,
    pub split_count: usize,
    pub split_files: Vec<String>,
    pub encrypted: bool,
    pub encryption_duration_ms: u64,
    pub stages: Vec<StageMetrics>,
    pub total_duration_ms: u64,
}

impl TaskStatistics {
    pub fn new(task_id: u64, batch_number: impl Into<String>) -> Self {
        Self {
            task_id,
            batch_number: batch_number.into(),
            started_at: Utc::now(),
            table_row_counts: BTreeMap::new(),
            total_tables: 0,
            total_rows: 0,
            total_files: 0,
            total_file_size: 0,
            original_size: 0,
            compressed_size: 0,
            compression_ratio: 0.0,
            split_count: 0,
            split_files: Vec::new(),
            encrypted: false,
            encryption_duration_ms: 0,
            stages: Vec::new(),
            total_duration_ms: 0,
        }
    }

    pub fn stage_start(&mut self, stage: &str) {
        self.stages.push(StageMetrics {
            stage_name: stage.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: None,
            message: None,
        });
    }

    /// Close the most recent open entry for `stage`.
    pub fn stage_end(&mut self, stage: &str, status: StageStatus, message: impl Into<String>) {
        if let Some(metrics) = self
            .stages
            .iter_mut()
            .rev()
            .find(|m| m.stage_name == stage && m.end_time.is_none())
        {
            close(metrics, status, message.into());
        }
    }

    /// Close every still-open stage as FAILED.
    pub fn fail_open_stages(&mut self, message: &str) {
        for metrics in self.stages.iter_mut().filter(|m| m.end_time.is_none()) {
            close(metrics, StageStatus::Failed, message.to_string());
        }
    }

    pub fn stage(&self, stage: &str) -> Option<&StageMetrics> {
        self.stages.iter().rev().find(|m| m.stage_name == stage)
    }

    pub fn record_table(&mut self, table: &str, rows: u64) {
        match self.table_row_counts.get_mut(table) {
            Some(count) => *count += rows,
            None => {
                self.table_row_counts.insert(table.to_string(), rows);
                self.total_tables += 1;
            }
        }
        self.total_rows += rows;
    }

    pub fn record_file(&mut self, size: u64) {
        self.total_files += 1;
        self.total_file_size += size;
    }

    pub fn record_compression(&mut self, original_size: u64, compressed_size: u64) {
        self.original_size = original_size;
        self.compressed_size = compressed_size;
        self.compression_ratio = if original_size == 0 {
            0.0
        } else {
            compressed_size as f64 / original_size as f64
        };
    }

    pub fn record_splits(&mut self, parts: &[PathBuf]) {
        self.split_count = parts.len();
        self.split_files = parts
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
    }

    pub fn record_encryption(&mut self, elapsed: Duration) {
        self.encrypted = true;
        self.encryption_duration_ms = duration_ms(elapsed);
    }

    pub fn finish(&mut self) {
        self.total_duration_ms = millis_between(self.started_at, Utc::now());
    }

    /// Finish and store as the task record's `statistics`.
    pub fn persist(&mut self, store: &dyn TaskStore) -> Result<()> {
        self.finish();
        let value = serde_json::to_value(&*self)?;
        store.update(self.task_id, &mut |record| {
            record.statistics = Some(value.clone());
        })
    }

    /// Size of a file, zero if it cannot be read
    pub fn file_size(path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}

fn close(metrics: &mut StageMetrics, status: StageStatus, message: String) {
    let now = Utc::now();
    metrics.end_time = Some(now);
    metrics.duration_ms = Some(millis_between(metrics.start_time, now));
    metrics.status = Some(status);
    metrics.message = Some(message);
}

fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{InMemoryTaskStore, NewTask};

    #[test]
    fn test_stage_lifecycle() {
        let mut stats = TaskStatistics::new(1, "20240301_001");
        stats.stage_start("EXPORT");
        stats.stage_end("EXPORT", StageStatus::Success, "3 tables");
        stats.stage_start("MANIFEST");

        let export = stats.stage("EXPORT").unwrap();
        assert_eq!(export.status, Some(StageStatus::Success));
        assert!(export.duration_ms.is_some());

        stats.fail_open_stages("checksum failed");
        let manifest = stats.stage("MANIFEST").unwrap();
        assert_eq!(manifest.status, Some(StageStatus::Failed));
        assert_eq!(manifest.message.as_deref(), Some("checksum failed"));
        assert_eq!(
            stats.stage("EXPORT").unwrap().status,
            Some(StageStatus::Success)
        );
    }

    #[test]
    fn test_table_totals_do_not_double_count() {
        let mut stats = TaskStatistics::new(1, "b");
        stats.record_table("t1", 10);
        stats.record_table("t2", 5);
        stats.record_table("t1", 1);
        assert_eq!(stats.total_tables, 2);
        assert_eq!(stats.total_rows, 16);
        assert_eq!(stats.table_row_counts["t1"], 11);
    }

    #[test]
    fn test_compression_and_splits() {
        let mut stats = TaskStatistics::new(1, "b");
        stats.record_compression(1000, 250);
        assert!((stats.compression_ratio - 0.25).abs() < f64::EPSILON);
        stats.record_compression(0, 10);
        assert_eq!(stats.compression_ratio, 0.0);

        stats.record_splits(&[PathBuf::from("/x/a.tar.gz.001"), PathBuf::from("/x/a.tar.gz.002")]);
        assert_eq!(stats.split_count, 2);
        assert_eq!(stats.split_files, vec!["a.tar.gz.001", "a.tar.gz.002"]);
    }

    #[test]
    fn test_persist_writes_statistics_json() {
        let store = InMemoryTaskStore::new();
        let id = store.create(NewTask::default()).unwrap().id;
        let mut stats = TaskStatistics::new(id, "b");
        stats.record_table("t1", 3);
        stats.persist(&store).unwrap();

        let value = store.find_by_id(id).unwrap().statistics.unwrap();
        assert_eq!(value["total_rows"], 3);
        assert_eq!(value["batch_number"], "b");
    }
}

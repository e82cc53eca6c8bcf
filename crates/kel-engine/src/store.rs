//! Persistent task records and the store abstraction behind them

use chrono::{DateTime, Utc};
use kel_common::{KelError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle status of a task record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet started
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an execution log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub log_level: LogLevel,
    pub stage: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// One run of one job for one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: u64,
    pub job_name: String,
    pub batch_number: String,
    pub status: TaskStatus,
    /// Overall progress, 0-100
    pub progress: u8,
    pub current_stage: String,
    pub error_message: Option<String>,
    pub config_snapshot: Option<serde_json::Value>,
    pub statistics: Option<serde_json::Value>,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a task record is created
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub job_name: String,
    pub batch_number: String,
    pub config_snapshot: Option<serde_json::Value>,
}

/// Storage for task records
///
/// Implementations must serialize concurrent updates to the same record.
pub trait TaskStore: Send + Sync {
    /// Insert a new PENDING record and assign its id
    fn create(&self, task: NewTask) -> Result<TaskRecord>;

    /// Apply `apply` to the record under the store's lock
    fn update(&self, id: u64, apply: &mut dyn FnMut(&mut TaskRecord)) -> Result<()>;

    fn find_by_id(&self, id: u64) -> Option<TaskRecord>;

    fn find_by_batch(&self, batch_number: &str) -> Option<TaskRecord>;

    /// Records of one job, newest first
    fn find_by_job(&self, job_name: &str) -> Vec<TaskRecord>;

    fn count(&self) -> usize;

    /// Number of records whose batch number starts with `prefix`
    fn count_batches_with_prefix(&self, prefix: &str) -> usize;
}

/// Process-local [`TaskStore`]
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    records: Mutex<BTreeMap<u64, TaskRecord>>,
    next_id: AtomicU64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, task: NewTask) -> Result<TaskRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let record = TaskRecord {
            id,
            job_name: task.job_name,
            batch_number: task.batch_number,
            status: TaskStatus::Pending,
            progress: 0,
            current_stage: "INIT".to_string(),
            error_message: None,
            config_snapshot: task.config_snapshot,
            statistics: None,
            execution_log: Vec::new(),
            start_time: None,
            end_time: None,
            created_at: now,
            updated_at: now,
        };
        self.records.lock().insert(id, record.clone());
        Ok(record)
    }

    fn count(&self) -> usize {
        self.records.lock().len()
    }

    fn update(&self, id: u64, apply: &mut dyn FnMut(&mut TaskRecord)) -> Result<()> {
        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(KelError::TaskNotFound(id))?;
        apply(record);
        record.updated_at = Utc::now();
        Ok(())
    }

    fn find_by_id(&self, id: u64) -> Option<TaskRecord> {
        self.records.lock().get(&id).cloned()
    }

    fn find_by_batch(&self, batch_number: &str) -> Option<TaskRecord> {
        self.records
            .lock()
            .values()
            .rev()
            .find(|r| r.batch_number == batch_number)
            .cloned()
    }

    fn find_by_job(&self, job_name: &str) -> Vec<TaskRecord> {
        self.records
            .lock()
            .values()
            .rev()
            .filter(|r| r.job_name == job_name)
            .cloned()
            .collect()
    }

    fn count_batches_with_prefix(&self, prefix: &str) -> usize {
        self.records
            .lock()
            .values()
            .filter(|r| r.batch_number.starts_with(prefix))
            .count()
    }
}

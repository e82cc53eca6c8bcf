//! Human-readable progress messages appended to a task's execution log

use crate::store::{ExecutionLogEntry, LogLevel, TaskStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Writes progress and messages to task records and mirrors them to tracing.
///
/// Store failures are logged, never propagated: bookkeeping must not fail a
/// pipeline that is otherwise healthy.
#[derive(Clone)]
pub struct TaskLogger {
    store: Arc<dyn TaskStore>,
}

impl TaskLogger {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn log_progress(&self, task_id: u64, stage: &str, progress: u8, message: &str) {
        info!(task_id, stage, progress, "{message}");
        self.write(task_id, LogLevel::Info, stage, message, Some(progress));
    }

    pub fn log_warning(&self, task_id: u64, stage: &str, message: &str) {
        warn!(task_id, stage, "{message}");
        self.write(task_id, LogLevel::Warn, stage, message, None);
    }

    pub fn mark_success(&self, task_id: u64, message: &str) {
        info!(task_id, "{message}");
        self.write(task_id, LogLevel::Info, "FINALIZE", message, Some(100));
    }

    pub fn mark_failed(&self, task_id: u64, message: &str, cause: &str) {
        error!(task_id, error = %cause, "{message}");
        let text = format!("{message}: {cause}");
        self.write(task_id, LogLevel::Error, "FAILED", &text, None);
    }

    fn write(&self, task_id: u64, level: LogLevel, stage: &str, message: &str, progress: Option<u8>) {
        let result = self.store.update(task_id, &mut |record| {
            if let Some(p) = progress {
                record.progress = p.min(100);
            }
            record.current_stage = stage.to_string();
            record.execution_log.push(ExecutionLogEntry {
                log_level: level,
                stage: stage.to_string(),
                message: message.to_string(),
                created_at: Utc::now(),
            });
        });
        if let Err(e) = result {
            debug!(task_id, error = %e, "Task log entry dropped");
        }
    }
}

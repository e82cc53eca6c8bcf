//! Task status transitions

use crate::store::{TaskStatus, TaskStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Guards task status changes.
///
/// Allowed: PENDING -> RUNNING, RUNNING -> SUCCESS | FAILED | CANCELLED,
/// FAILED -> RUNNING (manual retry). Re-entering the current state is a no-op
/// that still reports success.
#[derive(Clone)]
pub struct TaskStateMachine {
    store: Arc<dyn TaskStore>,
}

impl TaskStateMachine {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn is_allowed(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Pending, Running)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Running)
        )
    }

    /// Whether a task in `status` may be restarted
    pub fn can_retry(status: TaskStatus) -> bool {
        Self::is_allowed(status, TaskStatus::Running)
    }

    pub fn current_status(&self, task_id: u64) -> Option<TaskStatus> {
        self.store.find_by_id(task_id).map(|r| r.status)
    }

    pub fn mark_running(&self, task_id: u64, message: &str) -> bool {
        self.transition(task_id, TaskStatus::Running, message, None)
    }

    pub fn mark_success(&self, task_id: u64, message: &str) -> bool {
        self.transition(task_id, TaskStatus::Success, message, None)
    }

    pub fn mark_failed(&self, task_id: u64, message: &str, error: &str) -> bool {
        self.transition(task_id, TaskStatus::Failed, message, Some(error))
    }

    pub fn mark_cancelled(&self, task_id: u64, message: &str) -> bool {
        self.transition(task_id, TaskStatus::Cancelled, message, None)
    }

    /// Move `task_id` to `to`, returning whether the task is now in that state.
    pub fn transition(
        &self,
        task_id: u64,
        to: TaskStatus,
        message: &str,
        error: Option<&str>,
    ) -> bool {
        let Some(from) = self.current_status(task_id) else {
            warn!(task_id, to = %to, "Status change for unknown task");
            return false;
        };
        if from == to {
            debug!(task_id, status = %to, "Task already in requested state");
            return true;
        }
        if !Self::is_allowed(from, to) {
            warn!(task_id, from = %from, to = %to, "Illegal task status transition");
            return false;
        }

        let mut applied = false;
        let result = self.store.update(task_id, &mut |record| {
            // re-check under the store lock
            if record.status != from {
                return;
            }
            let now = Utc::now();
            record.status = to;
            record.current_stage = message.to_string();
            match to {
                TaskStatus::Running => {
                    record.start_time.get_or_insert(now);
                    record.end_time = None;
                    record.error_message = None;
                }
                TaskStatus::Failed => {
                    record.end_time = Some(now);
                    record.error_message = error.map(str::to_string);
                }
                TaskStatus::Success | TaskStatus::Cancelled => {
                    record.end_time = Some(now);
                }
                TaskStatus::Pending => {}
            }
            applied = true;
        });

        match result {
            Ok(()) if applied => {
                info!(task_id, from = %from, to = %to, "{message}");
                true
            }
            Ok(()) => {
                warn!(task_id, to = %to, "Task status changed concurrently");
                false
            }
            Err(e) => {
                warn!(task_id, error = %e, "Status change failed");
                false
            }
        }
    }
}

//! Progress display for running tasks
//!
//! The engine runs a pipeline on its own thread; the CLI polls the task
//! record and mirrors its progress and stage on an `indicatif` bar.

use crate::error::Result;
use indicatif::{ProgressBar, ProgressStyle};
use kel_engine::orchestrator::TaskHandle;
use kel_engine::retry::Interrupt;
use kel_engine::{TaskExecutionContext, TaskStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {prefix}";

/// Create a 0-100 progress bar for a task
pub fn create_task_progress(message: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Mirror the task record on `pb` until the pipeline thread finishes.
///
/// Ctrl-C triggers `interrupt`, which cancels a pending retry wait; the
/// running attempt itself is allowed to finish.
pub async fn follow(
    store: Arc<dyn TaskStore>,
    handle: TaskHandle,
    interrupt: Interrupt,
    poll: Duration,
    pb: &ProgressBar,
) -> Result<TaskExecutionContext> {
    let mut ticker = tokio::time::interval(poll);
    let refresh = |pb: &ProgressBar| {
        if let Some(record) = store.find_by_id(handle.task_id) {
            pb.set_position(u64::from(record.progress));
            pb.set_prefix(record.current_stage);
        }
    };

    while !handle.is_finished() {
        tokio::select! {
            _ = ticker.tick() => refresh(pb),
            _ = tokio::signal::ctrl_c(), if !interrupt.is_triggered() => {
                warn!(task_id = handle.task_id, "Interrupt received, cancelling retries");
                pb.println("Interrupted: the current attempt will finish, no retries will follow");
                interrupt.trigger();
            }
        }
    }
    refresh(pb);

    let outcome = tokio::task::spawn_blocking(move || handle.join())
        .await
        .map_err(anyhow::Error::from)?;
    Ok(outcome?)
}

//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod checksum;
pub mod extract;
pub mod jobs;
pub mod load;
pub mod verify;

use crate::config::Settings;
use crate::error::{CliError, Result};
use crate::progress::{create_task_progress, follow};
use kel_engine::config::JobConfig;
use kel_engine::store::TaskRecord;
use kel_engine::{
    ConfigProvider, InMemoryTaskStore, JobKind, Orchestrator, TaskExecutionContext, TaskStore,
    YamlConfigProvider,
};
use std::sync::Arc;

/// A finished run: the final context and its task record
pub struct Finished {
    pub ctx: TaskExecutionContext,
    pub record: Option<TaskRecord>,
}

/// Load `job`, mapping a missing file to [`CliError::JobNotFound`].
pub(crate) fn find_job(provider: &YamlConfigProvider, job: &str) -> Result<JobConfig> {
    if !provider.list_jobs()?.iter().any(|name| name == job) {
        return Err(CliError::JobNotFound(job.to_string()));
    }
    Ok(provider.load_job(job)?)
}

/// Run `job` as a `kind` job with a live progress bar.
pub(crate) async fn run_job(
    settings: &Settings,
    job: &str,
    kind: JobKind,
    batch: Option<&str>,
    tables: &[String],
) -> Result<Finished> {
    let provider = YamlConfigProvider::new(&settings.conf_dir);
    let actual = find_job(&provider, job)?.job_type().kind();
    if actual != kind {
        return Err(CliError::WrongJobKind {
            job: job.to_string(),
            actual: actual.to_string(),
        });
    }

    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let orchestrator = Arc::new(Orchestrator::new(store.clone()));
    let handle = orchestrator.trigger_tables(&provider, job, batch, tables)?;

    let pb = create_task_progress(&format!("{kind} {job} (batch {})", handle.batch_number));
    let task_id = handle.task_id;
    let outcome = follow(
        store.clone(),
        handle,
        orchestrator.interrupt().clone(),
        settings.poll_interval(),
        &pb,
    )
    .await;
    match outcome {
        Ok(ctx) => {
            pb.finish_and_clear();
            Ok(Finished {
                ctx,
                record: store.find_by_id(task_id),
            })
        }
        Err(e) => {
            pb.abandon();
            Err(e)
        }
    }
}

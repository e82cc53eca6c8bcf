//! Extract and load pipelines

use crate::batch::{highest_sequence, resolve_latest_batch, today_prefix, BatchNumberGenerator};
use crate::config::{ConfigProvider, JobKind, MergedConfig};
use crate::context::TaskExecutionContext;
use crate::crypto;
use crate::delivery::{deliver_file_by_move, Delivery};
use crate::disk::{DiskSpaceGate, DiskStats, SystemDisk};
use crate::fs::{dir_size, ensure_dir, list_files, remove_dir_if_exists, safe_join};
use crate::manifest::{self, MANIFEST_FILE};
use crate::metrics::{StageStatus, TaskStatistics};
use crate::packaging::{self, archive_name, is_package_file};
use crate::plugin::{FileExtractMover, FileLoadMover, Mover, MoverRegistry};
use crate::progress::{overall_progress, ExtractStage, LoadStage, ProgressTracker, Stage};
use crate::retry::{Interrupt, RetryPolicy, RetryService};
use crate::state::TaskStateMachine;
use crate::store::{NewTask, TaskStore};
use crate::task_log::TaskLogger;
use kel_common::{IoResultExt, KelError, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{info, info_span, warn};

type Attempt = fn(&Orchestrator, &mut TaskExecutionContext, &mut TaskStatistics) -> Result<()>;

/// Runs pipelines and keeps their task records current.
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    logger: TaskLogger,
    state: TaskStateMachine,
    progress: ProgressTracker,
    retry: RetryService,
    batches: BatchNumberGenerator,
    extract_movers: MoverRegistry,
    load_movers: MoverRegistry,
    disk_stats: Arc<dyn DiskStats>,
}

pub struct OrchestratorBuilder {
    store: Arc<dyn TaskStore>,
    extract_movers: MoverRegistry,
    load_movers: MoverRegistry,
    disk_stats: Arc<dyn DiskStats>,
    interrupt: Interrupt,
}

impl OrchestratorBuilder {
    /// Register an extract mover ahead of the built-in file mover.
    pub fn extract_mover(mut self, mover: impl Mover + 'static) -> Self {
        self.extract_movers.register(Arc::new(mover));
        self
    }

    /// Register a load mover ahead of the built-in file mover.
    pub fn load_mover(mut self, mover: impl Mover + 'static) -> Self {
        self.load_movers.register(Arc::new(mover));
        self
    }

    pub fn disk_stats(mut self, stats: impl DiskStats + 'static) -> Self {
        self.disk_stats = Arc::new(stats);
        self
    }

    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn build(mut self) -> Orchestrator {
        self.extract_movers.register(Arc::new(FileExtractMover));
        self.load_movers.register(Arc::new(FileLoadMover));
        Orchestrator {
            logger: TaskLogger::new(self.store.clone()),
            state: TaskStateMachine::new(self.store.clone()),
            progress: ProgressTracker::new(self.store.clone()),
            retry: RetryService::new(self.interrupt),
            batches: BatchNumberGenerator::new(),
            extract_movers: self.extract_movers,
            load_movers: self.load_movers,
            disk_stats: self.disk_stats,
            store: self.store,
        }
    }
}

/// A pipeline running on its own thread
pub struct TaskHandle {
    pub task_id: u64,
    pub batch_number: String,
    handle: JoinHandle<Result<TaskExecutionContext>>,
}

impl TaskHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the pipeline and return its final context.
    pub fn join(self) -> Result<TaskExecutionContext> {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(KelError::Io(io::Error::other("task thread panicked"))),
        }
    }
}

impl Orchestrator {
    pub fn builder(store: Arc<dyn TaskStore>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            extract_movers: MoverRegistry::new(),
            load_movers: MoverRegistry::new(),
            disk_stats: Arc::new(SystemDisk),
            interrupt: Interrupt::new(),
        }
    }

    /// Orchestrator with only the built-in file movers
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self::builder(store).build()
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Cancels pending retry waits when triggered
    pub fn interrupt(&self) -> &Interrupt {
        self.retry.interrupt()
    }

    /// Create the task record and context for one run of a job.
    ///
    /// Extract runs always get a fresh batch number, past every batch of the
    /// day already recorded in the store or published under the job's
    /// exchange directory. Load runs use `batch` when given, otherwise the
    /// latest batch under the input directory.
    pub fn create_context(
        &self,
        config: MergedConfig,
        batch: Option<&str>,
    ) -> Result<TaskExecutionContext> {
        if config.job_name().trim().is_empty() {
            return Err(KelError::config("job.name must not be blank"));
        }
        let batch_number = match config.job_type().kind() {
            JobKind::Extract => {
                if let Some(requested) = batch {
                    warn!(requested, "Extract batches are numbered automatically; ignoring requested batch");
                }
                let prefix = today_prefix();
                let recorded = self.store.count_batches_with_prefix(&prefix);
                let published =
                    highest_sequence(&config.exchange_root().join(config.job_name()), &prefix)?;
                self.batches
                    .next(recorded.max(usize::try_from(published).unwrap_or(usize::MAX)))
            }
            JobKind::Load => match batch {
                Some(name) => {
                    check_batch_name(name)?;
                    name.to_string()
                }
                None => {
                    let root = config.input_root().ok_or_else(|| {
                        KelError::config(format!(
                            "job '{}' has no resources.load_dir.input_dir",
                            config.job_name()
                        ))
                    })?;
                    resolve_latest_batch(root)?
                }
            },
        };

        let record = self.store.create(NewTask {
            job_name: config.job_name().to_string(),
            batch_number: batch_number.clone(),
            config_snapshot: Some(config.redacted_snapshot()),
        })?;
        info!(task_id = record.id, job = config.job_name(), batch = %batch_number, "Task created");
        Ok(TaskExecutionContext::new(record.id, batch_number, config))
    }

    /// Load the job from `provider`, create its task and run it to completion.
    pub fn run_job(
        &self,
        provider: &dyn ConfigProvider,
        job_name: &str,
        batch: Option<&str>,
    ) -> Result<TaskExecutionContext> {
        let config = provider.load_merged(job_name)?;
        let mut ctx = self.create_context(config, batch)?;
        self.execute(&mut ctx)?;
        Ok(ctx)
    }

    /// Like [`Orchestrator::run_job`] but on a background thread.
    pub fn trigger(
        self: &Arc<Self>,
        provider: &dyn ConfigProvider,
        job_name: &str,
        batch: Option<&str>,
    ) -> Result<TaskHandle> {
        self.trigger_tables(provider, job_name, batch, &[])
    }

    /// Trigger a run limited to `tables`; an empty list runs the whole job.
    pub fn trigger_tables(
        self: &Arc<Self>,
        provider: &dyn ConfigProvider,
        job_name: &str,
        batch: Option<&str>,
        tables: &[String],
    ) -> Result<TaskHandle> {
        let config = provider.load_merged(job_name)?.select_tables(tables)?;
        if !tables.is_empty() {
            info!(job = job_name, tables = %tables.join(","), "Running selected tables");
        }
        let ctx = self.create_context(config, batch)?;
        self.spawn(ctx)
    }

    /// Run the pipeline for `ctx` on a dedicated thread.
    pub fn spawn(self: &Arc<Self>, mut ctx: TaskExecutionContext) -> Result<TaskHandle> {
        let orchestrator = Arc::clone(self);
        let task_id = ctx.task_id();
        let batch_number = ctx.batch_number().to_string();
        let handle = std::thread::Builder::new()
            .name(format!("kel-task-{task_id}"))
            .spawn(move || orchestrator.execute(&mut ctx).map(|()| ctx))?;
        Ok(TaskHandle {
            task_id,
            batch_number,
            handle,
        })
    }

    /// Run the pipeline matching the job's kind.
    pub fn execute(&self, ctx: &mut TaskExecutionContext) -> Result<()> {
        match ctx.kind() {
            JobKind::Extract => self.execute_extract(ctx),
            JobKind::Load => self.execute_load(ctx),
        }
    }

    pub fn execute_extract(&self, ctx: &mut TaskExecutionContext) -> Result<()> {
        let span = info_span!("extract", task_id = ctx.task_id(), job = %ctx.job_name(), batch = %ctx.batch_number());
        let _entered = span.enter();
        self.run_pipeline(ctx, JobKind::Extract, "Extract", Self::extract_attempt)
    }

    pub fn execute_load(&self, ctx: &mut TaskExecutionContext) -> Result<()> {
        let span = info_span!("load", task_id = ctx.task_id(), job = %ctx.job_name(), batch = %ctx.batch_number());
        let _entered = span.enter();
        self.run_pipeline(ctx, JobKind::Load, "Load", Self::load_attempt)
    }

    fn run_pipeline(
        &self,
        ctx: &mut TaskExecutionContext,
        kind: JobKind,
        label: &str,
        attempt: Attempt,
    ) -> Result<()> {
        let task_id = ctx.task_id();
        if !self.state.mark_running(task_id, &format!("{label} task started")) {
            return Err(KelError::config(format!(
                "task {task_id} cannot be started from its current state"
            )));
        }
        if let Err(e) = ctx.config().validate(kind) {
            return Err(self.fail(task_id, label, e, None));
        }

        let policy = RetryPolicy::from(ctx.config().retry());
        let mut last_stats = None;
        let result = self.retry.execute(policy, label, |n| {
            if n > 0 {
                self.logger.log_warning(
                    task_id,
                    "RETRY",
                    &format!("Retry {n} of {}", policy.max_retries),
                );
            }
            let mut stats = TaskStatistics::new(task_id, ctx.batch_number());
            let outcome = attempt(self, ctx, &mut stats);
            if let Err(e) = &outcome {
                stats.fail_open_stages(&e.to_string());
            }
            last_stats = Some(stats);
            outcome
        });

        result.map_err(|e| self.fail(task_id, label, e, last_stats))
    }

    fn fail(
        &self,
        task_id: u64,
        label: &str,
        error: KelError,
        stats: Option<TaskStatistics>,
    ) -> KelError {
        if let Some(mut stats) = stats {
            if let Err(e) = stats.persist(self.store.as_ref()) {
                warn!(task_id, error = %e, "Could not store statistics");
            }
        }
        let message = format!("{label} task failed");
        let cause = error.to_string();
        self.logger.mark_failed(task_id, &message, &cause);
        self.state.mark_failed(task_id, &message, &cause);
        error
    }

    fn finish(&self, task_id: u64, label: &str, stats: &mut TaskStatistics) {
        if let Err(e) = stats.persist(self.store.as_ref()) {
            warn!(task_id, error = %e, "Could not store statistics");
        }
        let message = format!("{label} task completed");
        self.logger.mark_success(task_id, &message);
        self.state.mark_success(task_id, &message);
    }

    fn milestone(&self, task_id: u64, stage: impl Stage, local: u32, message: &str) {
        self.logger
            .log_progress(task_id, stage.name(), overall_progress(stage, local), message);
    }

    fn check_disk(&self, config: &MergedConfig, paths: &[&Path]) -> Result<()> {
        let gate = DiskSpaceGate::with_stats(config.disk_protection().clone(), self.disk_stats.clone());
        if gate.check_paths(paths) {
            return Ok(());
        }
        let listed: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        Err(KelError::DiskSpace(format!(
            "free space below the configured minimum under {}",
            listed.join(", ")
        )))
    }

    fn extract_attempt(&self, ctx: &mut TaskExecutionContext, stats: &mut TaskStatistics) -> Result<()> {
        let task_id = ctx.task_id();
        ctx.attributes.clear();
        self.progress.update(task_id, ExtractStage::Init, 0);

        stats.stage_start("DISK_CHECK");
        self.progress.update(task_id, ExtractStage::DiskCheck, 0);
        let work_root = ctx.config().work_root();
        let exchange_root = ctx.config().exchange_root();
        self.check_disk(ctx.config(), &[work_root.as_path(), exchange_root.as_path()])?;
        stats.stage_end("DISK_CHECK", StageStatus::Success, "Disk space sufficient");
        self.progress.update(task_id, ExtractStage::DiskCheck, 100);

        stats.stage_start("INIT");
        let exchange_dir = ctx.exchange_dir();
        if !ctx.owns_exchange_dir() && exchange_dir.exists() {
            return Err(KelError::BatchExists(exchange_dir));
        }
        let work_dir = ctx.work_dir();
        remove_dir_if_exists(&work_dir)?;
        ensure_dir(&work_dir)?;
        stats.stage_end("INIT", StageStatus::Success, work_dir.display().to_string());

        stats.stage_start("EXPORT");
        self.progress.update(task_id, ExtractStage::Export, 0);
        match self.extract_movers.select(ctx) {
            Some(mover) => {
                info!(mover = mover.name(), "Exporting");
                mover.run(ctx).map_err(KelError::Mover)?;
                for file in &ctx.attributes.exported_files {
                    if let Some(table) = &file.table_name {
                        stats.record_table(table, file.row_count.unwrap_or(0));
                    }
                    let path = safe_join(&work_dir, Path::new(&file.name))?;
                    stats.record_file(TaskStatistics::file_size(&path));
                }
                let message = format!("Exported {} files", ctx.attributes.exported_files.len());
                stats.stage_end("EXPORT", StageStatus::Success, &message);
                self.milestone(task_id, ExtractStage::Export, 100, &message);
            }
            None => {
                let message = format!("No mover for job type {}", ctx.job_type());
                self.logger.log_warning(task_id, "EXPORT", &message);
                stats.stage_end("EXPORT", StageStatus::Skipped, message);
            }
        }

        stats.stage_start("MANIFEST");
        self.progress.update(task_id, ExtractStage::Manifest, 0);
        let batch_manifest = manifest::generate(ctx, &work_dir)?;
        manifest::write(&batch_manifest, &work_dir.join(MANIFEST_FILE))?;
        stats.stage_end(
            "MANIFEST",
            StageStatus::Success,
            format!("{} files listed", batch_manifest.files.len()),
        );
        self.progress.update(task_id, ExtractStage::Manifest, 100);

        stats.stage_start("COMPRESS");
        self.progress.update(task_id, ExtractStage::Compress, 0);
        let job_root = work_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| work_root.clone());
        // package, shards and ciphertext stay out of the exchange tree until delivery
        let staging = tempfile::Builder::new()
            .prefix(".package-")
            .tempdir_in(&job_root)
            .at_path(&job_root)?;
        let archive = staging.path().join(archive_name(ctx.job_name(), ctx.batch_number()));
        packaging::pack(&work_dir, &archive)?;
        let compressed = TaskStatistics::file_size(&archive);
        stats.record_compression(dir_size(&work_dir)?, compressed);

        let parts = match ctx.config().split_threshold_bytes() {
            Some(threshold) if compressed > threshold => {
                let parts = packaging::split(&archive, threshold)?;
                stats.record_splits(&parts);
                parts
            }
            _ => vec![archive],
        };
        let message = format!("{} package file(s)", parts.len());
        stats.stage_end("COMPRESS", StageStatus::Success, &message);
        self.milestone(task_id, ExtractStage::Compress, 100, &message);

        stats.stage_start("ENCRYPT");
        self.progress.update(task_id, ExtractStage::Encrypt, 0);
        match ctx.config().encryption_key()? {
            Some(key) => {
                let started = Instant::now();
                for part in &parts {
                    let delivery = Delivery::begin(part)?;
                    crypto::encrypt_file(part, delivery.tmp_path(), key)?;
                    delivery.complete()?;
                }
                stats.record_encryption(started.elapsed());
                stats.stage_end("ENCRYPT", StageStatus::Success, "SM4-CBC");
            }
            None => stats.stage_end("ENCRYPT", StageStatus::Skipped, "Encryption disabled"),
        }
        self.progress.update(task_id, ExtractStage::Encrypt, 100);

        stats.stage_start("DELIVER");
        self.progress.update(task_id, ExtractStage::Deliver, 0);
        claim_exchange_dir(ctx, &exchange_dir)?;
        let mut published = Vec::with_capacity(parts.len());
        for part in &parts {
            let name = part.file_name().ok_or_else(|| {
                KelError::packaging(format!("bad package path {}", part.display()))
            })?;
            let target = exchange_dir.join(name);
            deliver_file_by_move(part, &target)?;
            published.push(target);
        }
        drop(staging);
        let mut sidecar = batch_manifest;
        manifest::add_split_info(&mut sidecar, &published)?;
        manifest::write(&sidecar, &exchange_dir.join(MANIFEST_FILE))?;
        stats.stage_end("DELIVER", StageStatus::Success, exchange_dir.display().to_string());
        self.milestone(
            task_id,
            ExtractStage::Deliver,
            100,
            &format!("Published to {}", exchange_dir.display()),
        );
        ctx.attributes.published = published;

        stats.stage_start("FINALIZE");
        self.progress.update(task_id, ExtractStage::Finalize, 0);
        if ctx.config().cleanup_work_dir() {
            if let Err(e) = remove_dir_if_exists(&work_dir) {
                self.logger
                    .log_warning(task_id, "FINALIZE", &format!("Work directory kept: {e}"));
            }
        }
        stats.stage_end("FINALIZE", StageStatus::Success, "Done");
        self.finish(task_id, "Extract", stats);
        Ok(())
    }

    fn load_attempt(&self, ctx: &mut TaskExecutionContext, stats: &mut TaskStatistics) -> Result<()> {
        let task_id = ctx.task_id();
        ctx.attributes.clear();
        self.progress.update(task_id, LoadStage::Init, 0);

        stats.stage_start("DISK_CHECK");
        self.progress.update(task_id, LoadStage::DiskCheck, 0);
        let work_root = ctx.config().work_root();
        self.check_disk(ctx.config(), &[work_root.as_path()])?;
        stats.stage_end("DISK_CHECK", StageStatus::Success, "Disk space sufficient");
        self.progress.update(task_id, LoadStage::DiskCheck, 100);

        stats.stage_start("INIT");
        let input_dir = ctx.input_dir()?;
        if !input_dir.is_dir() {
            return Err(KelError::io_at(
                &input_dir,
                io::Error::new(io::ErrorKind::NotFound, "batch directory not found"),
            ));
        }
        self.verify_package(task_id, &input_dir)?;
        let work_dir = ctx.work_dir();
        remove_dir_if_exists(&work_dir)?;
        let job_root = work_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| work_root.clone());
        ensure_dir(&job_root)?;
        stats.stage_end("INIT", StageStatus::Success, input_dir.display().to_string());

        stats.stage_start("DECRYPT");
        self.progress.update(task_id, LoadStage::Decrypt, 0);
        let staging = match ctx.config().encryption_key()? {
            Some(key) => {
                let staging = tempfile::Builder::new()
                    .prefix(".decrypt-")
                    .tempdir_in(&job_root)
                    .at_path(&job_root)?;
                let count = decrypt_package(&input_dir, staging.path(), key)?;
                stats.stage_end("DECRYPT", StageStatus::Success, format!("{count} file(s)"));
                Some(staging)
            }
            None => {
                stats.stage_end("DECRYPT", StageStatus::Skipped, "Encryption disabled");
                None
            }
        };
        self.progress.update(task_id, LoadStage::Decrypt, 100);

        stats.stage_start("UNPACK");
        self.progress.update(task_id, LoadStage::Unpack, 0);
        let source_dir: PathBuf = staging
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .unwrap_or_else(|| input_dir.clone());
        let unpacked = packaging::merge_and_unpack(&source_dir, &work_dir)?;
        drop(staging);
        let message = format!("Unpacked {unpacked} files");
        stats.stage_end("UNPACK", StageStatus::Success, &message);
        self.milestone(task_id, LoadStage::Unpack, 100, &message);

        stats.stage_start("VALIDATE");
        self.progress.update(task_id, LoadStage::Validate, 0);
        let inner = work_dir.join(MANIFEST_FILE);
        if inner.is_file() {
            let batch_manifest = manifest::parse(&inner)?;
            if !manifest::validate(&batch_manifest, &work_dir) {
                return Err(KelError::ManifestInvalid(format!(
                    "unpacked files in {} do not match their manifest",
                    work_dir.display()
                )));
            }
            if batch_manifest.batch_number != ctx.batch_number() {
                warn!(
                    manifest_batch = %batch_manifest.batch_number,
                    "Package was produced for a different batch"
                );
            }
            stats.stage_end(
                "VALIDATE",
                StageStatus::Success,
                format!("{} files verified", batch_manifest.files.len()),
            );
        } else {
            self.logger
                .log_warning(task_id, "VALIDATE", "Package has no manifest; contents not verified");
            stats.stage_end("VALIDATE", StageStatus::Skipped, "No manifest");
        }
        self.progress.update(task_id, LoadStage::Validate, 100);

        stats.stage_start("LOAD");
        self.progress.update(task_id, LoadStage::Load, 0);
        match self.load_movers.select(ctx) {
            Some(mover) => {
                info!(mover = mover.name(), "Loading");
                mover.run(ctx).map_err(KelError::Mover)?;
                for (table, rows) in &ctx.attributes.loaded_tables {
                    stats.record_table(table, *rows);
                }
                for mapping in &ctx.attributes.file_mappings {
                    stats.record_file(TaskStatistics::file_size(&mapping.target));
                }
                let message = format!(
                    "Loaded {} tables, {} files",
                    ctx.attributes.loaded_tables.len(),
                    ctx.attributes.file_mappings.len()
                );
                stats.stage_end("LOAD", StageStatus::Success, &message);
                self.milestone(task_id, LoadStage::Load, 100, &message);
            }
            None => {
                let message = format!("No mover for job type {}", ctx.job_type());
                self.logger.log_warning(task_id, "LOAD", &message);
                stats.stage_end("LOAD", StageStatus::Skipped, message);
            }
        }

        stats.stage_start("FINALIZE");
        self.progress.update(task_id, LoadStage::Finalize, 0);
        stats.stage_end("FINALIZE", StageStatus::Success, "Done");
        self.finish(task_id, "Load", stats);
        Ok(())
    }

    /// Check received package files against the sidecar manifest, if any.
    fn verify_package(&self, task_id: u64, input_dir: &Path) -> Result<()> {
        let sidecar_path = input_dir.join(MANIFEST_FILE);
        if !sidecar_path.is_file() {
            self.logger.log_warning(
                task_id,
                "INIT",
                "No manifest next to the package; integrity checked after unpack only",
            );
            return Ok(());
        }
        let sidecar = manifest::parse(&sidecar_path)?;
        if !sidecar.splits.is_empty() && !manifest::validate_splits(&sidecar, input_dir) {
            return Err(KelError::ManifestInvalid(format!(
                "package files in {} do not match {}",
                input_dir.display(),
                sidecar_path.display()
            )));
        }
        Ok(())
    }
}

/// Create the batch's exchange directory.
///
/// A directory this task did not create is never reused or removed. One it
/// created on an earlier attempt is emptied, since shard boundaries may differ.
fn claim_exchange_dir(ctx: &mut TaskExecutionContext, exchange_dir: &Path) -> Result<()> {
    if ctx.owns_exchange_dir() {
        remove_dir_if_exists(exchange_dir)?;
    }
    if let Some(parent) = exchange_dir.parent() {
        ensure_dir(parent)?;
    }
    match std::fs::create_dir(exchange_dir) {
        Ok(()) => {
            ctx.claim_exchange_dir();
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(KelError::BatchExists(exchange_dir.to_path_buf()))
        }
        Err(e) => Err(KelError::io_at(exchange_dir, e)),
    }
}

/// Decrypt every package file in `input_dir` into `staging`.
fn decrypt_package(input_dir: &Path, staging: &Path, key: &str) -> Result<usize> {
    let mut count = 0;
    for file in list_files(input_dir, "*")? {
        let Some(name) = file.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !is_package_file(&name) {
            continue;
        }
        crypto::decrypt_file(&file, &staging.join(&name), key)?;
        count += 1;
    }
    if count == 0 {
        return Err(KelError::packaging(format!(
            "no package found in {}",
            input_dir.display()
        )));
    }
    Ok(count)
}

fn check_batch_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(KelError::config(format!("invalid batch number '{name}'")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{GlobalConfig, JobConfig};
    use crate::disk::DiskSpace;
    use crate::store::{InMemoryTaskStore, TaskStatus};
    use std::fs;
    use tempfile::TempDir;

    struct FullDisk;

    impl DiskStats for FullDisk {
        fn space(&self, _path: &Path) -> io::Result<DiskSpace> {
            Ok(DiskSpace {
                total: 100 << 30,
                available: 1 << 20,
            })
        }
    }

    fn merged(yaml: &str) -> MergedConfig {
        let job: JobConfig = serde_yaml::from_str(yaml).unwrap();
        MergedConfig::merge(GlobalConfig::default(), job)
    }

    #[test]
    fn test_create_context_numbers_extract_batches() {
        let store = Arc::new(InMemoryTaskStore::new());
        let orchestrator = Orchestrator::new(store.clone());
        let config = merged("job: { type: FILE_EXTRACT, name: docs }");

        let first = orchestrator.create_context(config.clone(), None).unwrap();
        let second = orchestrator.create_context(config, Some("ignored")).unwrap();
        let prefix = today_prefix();
        assert_eq!(first.batch_number(), format!("{prefix}_001"));
        assert_eq!(second.batch_number(), format!("{prefix}_002"));

        let record = store.find_by_id(first.task_id()).unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(record.config_snapshot.is_some());
    }

    #[test]
    fn test_create_context_load_batch_resolution() {
        let input = TempDir::new().unwrap();
        fs::create_dir(input.path().join("20240301_001")).unwrap();
        fs::create_dir(input.path().join("20240302_003")).unwrap();
        let orchestrator = Orchestrator::new(Arc::new(InMemoryTaskStore::new()));
        let config = merged(&format!(
            "job: {{ type: FILE_LOAD, name: docs }}\nresources: {{ load_dir: {{ input_dir: {} }} }}\n",
            input.path().display()
        ));

        let latest = orchestrator.create_context(config.clone(), None).unwrap();
        assert_eq!(latest.batch_number(), "20240302_003");
        let pinned = orchestrator.create_context(config.clone(), Some("20240301_001")).unwrap();
        assert_eq!(pinned.batch_number(), "20240301_001");
        assert!(orchestrator.create_context(config, Some("../etc")).is_err());
    }

    #[test]
    fn test_disk_gate_failure_is_recorded() {
        let work = TempDir::new().unwrap();
        let store = Arc::new(InMemoryTaskStore::new());
        let orchestrator = Orchestrator::builder(store.clone()).disk_stats(FullDisk).build();
        let config = merged(&format!(
            r#"
job: {{ type: FILE_EXTRACT, name: docs }}
settings:
  work_dir: {work}
  disk_protection: {{ enabled: true, min_free_space_gb: 5 }}
resources: {{ extract_dir: {{ exchange_dir: {work}/exchange }} }}
"#,
            work = work.path().display()
        ));
        let mut ctx = orchestrator.create_context(config, None).unwrap();

        let err = orchestrator.execute(&mut ctx).unwrap_err();
        assert!(matches!(err, KelError::DiskSpace(_)));

        let record = store.find_by_id(ctx.task_id()).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error_message.unwrap().contains("free space"));
        let stats = record.statistics.unwrap();
        assert_eq!(stats["stages"][0]["stage_name"], "DISK_CHECK");
        assert_eq!(stats["stages"][0]["status"], "FAILED");
        assert!(!ctx.work_dir().exists());
    }

    #[test]
    fn test_config_error_fails_before_any_work() {
        let work = TempDir::new().unwrap();
        let store = Arc::new(InMemoryTaskStore::new());
        let orchestrator = Orchestrator::new(store.clone());
        let config = merged(&format!(
            r#"
job: {{ type: FILE_EXTRACT, name: docs }}
settings:
  work_dir: {}
  security: {{ enable_encryption: true }}
  runtime: {{ max_retries: 3, retry_interval_sec: 3600 }}
"#,
            work.path().display()
        ));
        let mut ctx = orchestrator.create_context(config, None).unwrap();

        let err = orchestrator.execute(&mut ctx).unwrap_err();
        assert!(matches!(err, KelError::Config(_)));
        assert_eq!(store.find_by_id(ctx.task_id()).unwrap().status, TaskStatus::Failed);
        assert!(fs::read_dir(work.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_run_job_from_yaml_provider() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("conf/jobs")).unwrap();
        fs::create_dir_all(root.path().join("source")).unwrap();
        fs::write(root.path().join("source/ledger.csv"), b"id\n1\n").unwrap();
        fs::write(
            root.path().join("conf/jobs/ledger.yaml"),
            format!(
                "job: {{ type: FILE_EXTRACT, name: ledger }}\n\
                 settings: {{ work_dir: {root}/work }}\n\
                 resources: {{ extract_dir: {{ extract_dir: {root}/source, exchange_dir: {root}/exchange }} }}\n\
                 tasks: [{{ mode: FULL }}]\n",
                root = root.path().display()
            ),
        )
        .unwrap();
        let provider = crate::config::YamlConfigProvider::new(root.path().join("conf"));
        let store = Arc::new(InMemoryTaskStore::new());
        let orchestrator = Orchestrator::new(store.clone());

        let ctx = orchestrator.run_job(&provider, "ledger", None).unwrap();

        assert_eq!(ctx.attributes.exported_files.len(), 1);
        assert_eq!(ctx.attributes.published.len(), 1);
        assert_eq!(store.find_by_id(ctx.task_id()).unwrap().status, TaskStatus::Success);
        assert!(orchestrator.run_job(&provider, "missing", None).is_err());
    }

    fn docs_job(root: &Path) -> MergedConfig {
        merged(&format!(
            "job: {{ type: FILE_EXTRACT, name: docs }}\n\
             settings: {{ work_dir: {root}/work, runtime: {{ max_retries: 2, retry_interval_sec: 0 }} }}\n\
             resources: {{ extract_dir: {{ extract_dir: {root}/source, exchange_dir: {root}/exchange }} }}\n\
             tasks: [{{ mode: FULL }}]\n",
            root = root.display()
        ))
    }

    #[test]
    fn test_extract_batch_follows_published_batches() {
        let root = TempDir::new().unwrap();
        let prefix = today_prefix();
        for seq in ["001", "004"] {
            fs::create_dir_all(root.path().join(format!("exchange/docs/{prefix}_{seq}"))).unwrap();
        }
        fs::create_dir_all(root.path().join("exchange/docs/19991231_009")).unwrap();
        let orchestrator = Orchestrator::new(Arc::new(InMemoryTaskStore::new()));

        let ctx = orchestrator.create_context(docs_job(root.path()), None).unwrap();
        assert_eq!(ctx.batch_number(), format!("{prefix}_005"));
    }

    #[test]
    fn test_existing_exchange_dir_is_never_reused() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("source")).unwrap();
        fs::write(root.path().join("source/a.txt"), b"alpha").unwrap();
        let store = Arc::new(InMemoryTaskStore::new());
        let orchestrator = Orchestrator::new(store.clone());
        let mut ctx = orchestrator.create_context(docs_job(root.path()), None).unwrap();
        // published by someone else after the number was issued
        let foreign = ctx.exchange_dir();
        fs::create_dir_all(&foreign).unwrap();
        fs::write(foreign.join("keep.txt"), b"published").unwrap();

        let err = orchestrator.execute(&mut ctx).unwrap_err();

        assert!(matches!(err, KelError::BatchExists(_)));
        assert_eq!(fs::read(foreign.join("keep.txt")).unwrap(), b"published");
        assert!(!ctx.owns_exchange_dir());
        let record = store.find_by_id(ctx.task_id()).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.execution_log.iter().all(|entry| entry.stage != "RETRY"));
    }

    #[test]
    fn test_package_is_staged_outside_exchange_dir() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("source")).unwrap();
        fs::write(root.path().join("source/a.txt"), b"alpha").unwrap();
        let orchestrator = Orchestrator::new(Arc::new(InMemoryTaskStore::new()));
        let mut ctx = orchestrator.create_context(docs_job(root.path()), None).unwrap();

        orchestrator.execute(&mut ctx).unwrap();

        assert!(ctx.owns_exchange_dir());
        let mut published: Vec<String> = fs::read_dir(ctx.exchange_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        published.sort();
        assert_eq!(
            published,
            [archive_name("docs", ctx.batch_number()), MANIFEST_FILE.to_string()]
        );
        let job_work: Vec<String> = fs::read_dir(root.path().join("work/docs"))
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        assert!(job_work.iter().all(|name| !name.starts_with(".package-")));
    }

    #[test]
    fn test_batch_names() {
        assert!(check_batch_name("20240301_001").is_ok());
        assert!(check_batch_name("").is_err());
        assert!(check_batch_name("..").is_err());
        assert!(check_batch_name("a/b").is_err());
    }
}

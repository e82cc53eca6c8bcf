//! Table movers over pluggable database sources and sinks
//!
//! Data files use PostgreSQL COPY text format: UTF-8, fields separated by
//! 0x1E, empty string for NULL, no header.

use super::Mover;
use crate::config::{DatabaseConfig, JobConfig, JobType, TaskItem, TaskMode};
use crate::context::{ExportedFile, TaskExecutionContext};
use crate::fs::{ensure_dir, list_files};
use crate::naming::{FileNaming, UnitKind};
use anyhow::{bail, Context};
use chrono::Local;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Field separator inside data files
pub const FIELD_DELIMITER: u8 = 0x1E;

/// Directory under the batch work directory holding table data files
pub const DATA_DIR: &str = "data";

/// One table or query to export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportUnit {
    pub kind: UnitKind,
    pub name: String,
    /// Query text for [`UnitKind::Query`]
    pub sql: Option<String>,
    pub incremental: bool,
}

impl ExportUnit {
    /// `COPY ... TO STDOUT` statement producing this unit's data file
    pub fn copy_out_statement(&self) -> String {
        let relation = match (&self.kind, &self.sql) {
            (UnitKind::Query, Some(sql)) => format!("({sql})"),
            _ => self.name.clone(),
        };
        format!(
            "COPY {relation} TO STDOUT WITH (FORMAT text, DELIMITER E'\\x1E', ENCODING 'UTF-8', NULL '', HEADER false)"
        )
    }
}

/// `COPY ... FROM STDIN` statement matching the export format
pub fn copy_in_statement(table: &str) -> String {
    format!("COPY {table} FROM STDIN WITH (FORMAT text, DELIMITER E'\\x1E', ENCODING 'UTF-8', NULL '')")
}

/// A connection able to stream table data out
pub trait SourceSession: Send {
    /// Write the unit's rows to `out`, returning how many were written.
    fn export(&mut self, unit: &ExportUnit, out: &mut dyn Write) -> anyhow::Result<u64>;
}

pub trait TableSource: Send + Sync {
    type Session: SourceSession;

    fn connect(&self, db: &DatabaseConfig) -> anyhow::Result<Self::Session>;
}

/// A connection able to load table data
pub trait SinkSession: Send {
    fn begin(&mut self) -> anyhow::Result<()>;

    fn commit(&mut self) -> anyhow::Result<()>;

    fn rollback(&mut self) -> anyhow::Result<()>;

    fn truncate(&mut self, table: &str) -> anyhow::Result<()>;

    /// Load rows from `data` into `table`, returning how many were loaded.
    fn copy_in(&mut self, table: &str, data: &mut dyn Read) -> anyhow::Result<u64>;

    fn execute(&mut self, sql: &str) -> anyhow::Result<()>;
}

pub trait TableSink: Send + Sync {
    type Session: SinkSession;

    fn connect(&self, db: &DatabaseConfig) -> anyhow::Result<Self::Session>;
}

type Connector<'a, S> = Box<dyn Fn() -> anyhow::Result<S> + Send + Sync + 'a>;

struct PoolState<S> {
    idle: Vec<S>,
    open: usize,
}

/// Bounded pool of sessions opened on demand
pub struct SessionPool<'a, S> {
    connect: Connector<'a, S>,
    capacity: usize,
    state: Mutex<PoolState<S>>,
    available: Condvar,
}

impl<'a, S: Send> SessionPool<'a, S> {
    pub fn new(capacity: usize, connect: impl Fn() -> anyhow::Result<S> + Send + Sync + 'a) -> Self {
        Self {
            connect: Box::new(connect),
            capacity: capacity.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Borrow a session, opening one if under capacity, otherwise waiting.
    pub fn acquire(&self) -> anyhow::Result<PooledSession<'_, 'a, S>> {
        let mut state = self.state.lock();
        loop {
            if let Some(session) = state.idle.pop() {
                return Ok(PooledSession {
                    pool: self,
                    session: Some(session),
                });
            }
            if state.open < self.capacity {
                state.open += 1;
                drop(state);
                return match (self.connect)() {
                    Ok(session) => Ok(PooledSession {
                        pool: self,
                        session: Some(session),
                    }),
                    Err(e) => {
                        self.forget();
                        Err(e)
                    }
                };
            }
            self.available.wait(&mut state);
        }
    }

    /// Sessions opened and not discarded
    pub fn open_sessions(&self) -> usize {
        self.state.lock().open
    }

    fn release(&self, session: S) {
        self.state.lock().idle.push(session);
        self.available.notify_one();
    }

    fn forget(&self) {
        let mut state = self.state.lock();
        state.open = state.open.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }
}

/// A session on loan; returned to the pool on drop.
pub struct PooledSession<'p, 'a, S: Send> {
    pool: &'p SessionPool<'a, S>,
    session: Option<S>,
}

impl<S: Send> PooledSession<'_, '_, S> {
    /// Close the session instead of returning it.
    pub fn discard(mut self) {
        if self.session.take().is_some() {
            self.pool.forget();
        }
    }
}

impl<S: Send> Deref for PooledSession<'_, '_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.session.as_ref().unwrap_or_else(|| unreachable!("session taken"))
    }
}

impl<S: Send> DerefMut for PooledSession<'_, '_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.session.as_mut().unwrap_or_else(|| unreachable!("session taken"))
    }
}

impl<S: Send> Drop for PooledSession<'_, '_, S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}

struct PlannedExport {
    unit: ExportUnit,
    file_name: String,
    path: PathBuf,
}

/// Exports configured tables and queries into `data/`.
///
/// With a concurrency above one, units are spread over that many worker
/// threads sharing a pool of `concurrency + 2` sessions.
pub struct TableExtractMover<T> {
    source: T,
}

impl<T: TableSource> TableExtractMover<T> {
    pub fn new(source: T) -> Self {
        Self { source }
    }

    fn export_serial(&self, db: &DatabaseConfig, planned: &[PlannedExport]) -> anyhow::Result<Vec<u64>> {
        let mut session = self.source.connect(db).context("connect to extract database")?;
        planned
            .iter()
            .map(|p| export_one(&mut session, p))
            .collect()
    }

    fn export_parallel(
        &self,
        db: &DatabaseConfig,
        planned: &[PlannedExport],
        workers: usize,
    ) -> anyhow::Result<Vec<u64>> {
        let pool = SessionPool::new(workers + 2, || {
            self.source.connect(db).context("connect to extract database")
        });
        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let outcomes: Mutex<Vec<Option<anyhow::Result<u64>>>> =
            Mutex::new(planned.iter().map(|_| None).collect());

        std::thread::scope(|scope| {
            for _ in 0..workers.min(planned.len()) {
                scope.spawn(|| loop {
                    if failed.load(Ordering::Acquire) {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::AcqRel);
                    let Some(job) = planned.get(index) else {
                        break;
                    };
                    let outcome = pool.acquire().and_then(|mut session| {
                        let result = export_one(&mut *session, job);
                        if result.is_err() {
                            session.discard();
                        }
                        result
                    });
                    if outcome.is_err() {
                        failed.store(true, Ordering::Release);
                    }
                    outcomes.lock()[index] = Some(outcome);
                });
            }
        });

        let mut rows = Vec::with_capacity(planned.len());
        for outcome in outcomes.into_inner() {
            match outcome {
                Some(Ok(count)) => rows.push(count),
                Some(Err(e)) => return Err(e),
                // not started because another unit failed first
                None => bail!("export aborted after an earlier failure"),
            }
        }
        Ok(rows)
    }
}

fn export_one<S: SourceSession + ?Sized>(session: &mut S, planned: &PlannedExport) -> anyhow::Result<u64> {
    let file = File::create(&planned.path)
        .with_context(|| format!("create {}", planned.path.display()))?;
    let mut out = BufWriter::new(file);
    let rows = session
        .export(&planned.unit, &mut out)
        .with_context(|| format!("export {}", planned.unit.name))?;
    out.flush()
        .with_context(|| format!("write {}", planned.path.display()))?;
    debug!(unit = %planned.unit.name, file = %planned.file_name, rows, "Exported");
    Ok(rows)
}

/// Tables then queries of every extract task, in configuration order
pub fn collect_units(job: &JobConfig) -> Vec<ExportUnit> {
    let mut units = Vec::new();
    for task in job.extract_tasks() {
        let incremental = task.mode == TaskMode::Incremental;
        units.extend(task.tables.iter().map(|table| ExportUnit {
            kind: UnitKind::Table,
            name: table.clone(),
            sql: None,
            incremental,
        }));
        units.extend(task.queries.iter().map(|query| ExportUnit {
            kind: UnitKind::Query,
            name: query.name.clone(),
            sql: Some(query.sql.clone()),
            incremental,
        }));
    }
    units
}

impl<T: TableSource> Mover for TableExtractMover<T> {
    fn name(&self) -> &str {
        "table-extract"
    }

    fn supports(&self, ctx: &TaskExecutionContext) -> bool {
        ctx.job_type() == JobType::TableExtract
    }

    fn run(&self, ctx: &mut TaskExecutionContext) -> anyhow::Result<()> {
        let Some(db) = ctx.config().job.resources.extract_database.clone() else {
            warn!(job = ctx.job_name(), "No resources.extract_database, skipping table export");
            return Ok(());
        };
        let units = collect_units(&ctx.config().job);
        if units.is_empty() {
            warn!(job = ctx.job_name(), "No tables or queries configured");
            return Ok(());
        }

        let data_dir = ctx.work_dir().join(DATA_DIR);
        ensure_dir(&data_dir)?;
        let naming = FileNaming::new(ctx.config().file_naming().cloned());
        let today = Local::now().date_naive();

        let mut seen = BTreeSet::new();
        let mut planned = Vec::with_capacity(units.len());
        for (seq, unit) in (1..).zip(units) {
            let file_name = naming.file_name(unit.kind, &unit.name, seq, unit.incremental, today);
            if !seen.insert(file_name.clone()) {
                bail!("two export units map to data file {file_name}");
            }
            planned.push(PlannedExport {
                path: data_dir.join(&file_name),
                file_name,
                unit,
            });
        }

        let concurrency = ctx.config().table_concurrency();
        info!(
            job = ctx.job_name(),
            host = %db.host,
            database = %db.name,
            units = planned.len(),
            concurrency,
            "Exporting"
        );
        let rows = if concurrency <= 1 || planned.len() <= 1 {
            self.export_serial(&db, &planned)?
        } else {
            self.export_parallel(&db, &planned, concurrency)?
        };

        for (p, count) in planned.into_iter().zip(rows) {
            ctx.attributes.exported_files.push(ExportedFile {
                name: format!("{DATA_DIR}/{}", p.file_name),
                table_name: Some(p.unit.name),
                row_count: Some(count),
            });
        }
        Ok(())
    }
}

/// Data file for `key` under `data_dir`.
///
/// Tries `<key>.txt`, then `<key with '.' as '_'>.txt`, then the first file
/// (by name) that equals `key` or starts with `<key>_` or `<key>.`.
pub fn resolve_data_file(data_dir: &Path, key: &str) -> Option<PathBuf> {
    let base = key.strip_suffix(".txt").unwrap_or(key);
    let direct = data_dir.join(format!("{base}.txt"));
    if direct.is_file() {
        return Some(direct);
    }
    let underscored = data_dir.join(format!("{}.txt", base.replace('.', "_")));
    if underscored.is_file() {
        return Some(underscored);
    }
    let files = list_files(data_dir, "*").ok()?;
    files.into_iter().find(|path| {
        path.file_name()
            .map(|n| n.to_string_lossy())
            .is_some_and(|name| {
                name == key || name.starts_with(&format!("{base}_")) || name.starts_with(&format!("{base}."))
            })
    })
}

/// Loads `data/` files into target tables per the job's load tasks.
pub struct TableLoadMover<K> {
    sink: K,
}

impl<K: TableSink> TableLoadMover<K> {
    pub fn new(sink: K) -> Self {
        Self { sink }
    }
}

fn load_task<S: SinkSession>(
    session: &mut S,
    data_dir: &Path,
    task: &TaskItem,
    loaded: &mut BTreeMap<String, u64>,
) -> anyhow::Result<()> {
    for (key, table) in &task.mappings {
        let Some(file) = resolve_data_file(data_dir, key) else {
            warn!(key = %key, table = %table, "No data file for mapping");
            continue;
        };
        if task.mode == TaskMode::TruncateLoad {
            session
                .truncate(table)
                .with_context(|| format!("truncate {table}"))?;
        }
        let mut reader = BufReader::new(
            File::open(&file).with_context(|| format!("open {}", file.display()))?,
        );
        let rows = session
            .copy_in(table, &mut reader)
            .with_context(|| format!("load {} into {table}", file.display()))?;
        *loaded.entry(table.clone()).or_default() += rows;
        info!(file = %file.display(), table = %table, rows, "Loaded");
    }

    let statements = task
        .merge_sql
        .iter()
        .chain(task.queries.iter().map(|q| &q.sql))
        .filter(|sql| !sql.trim().is_empty());
    for sql in statements {
        session.execute(sql).context("post-load statement")?;
    }
    Ok(())
}

impl<K: TableSink> Mover for TableLoadMover<K> {
    fn name(&self) -> &str {
        "table-load"
    }

    fn supports(&self, ctx: &TaskExecutionContext) -> bool {
        ctx.job_type() == JobType::TableLoad
    }

    fn run(&self, ctx: &mut TaskExecutionContext) -> anyhow::Result<()> {
        let Some(db) = ctx.config().job.resources.target_database.clone() else {
            warn!(job = ctx.job_name(), "No resources.target_database, skipping table load");
            return Ok(());
        };
        let data_dir = ctx.work_dir().join(DATA_DIR);
        if !data_dir.is_dir() {
            warn!(job = ctx.job_name(), dir = %data_dir.display(), "Package has no data/ directory");
            return Ok(());
        }
        let tasks: Vec<TaskItem> = ctx
            .config()
            .job
            .load_tasks()
            .filter(|t| !t.mappings.is_empty())
            .cloned()
            .collect();
        if tasks.is_empty() {
            info!(job = ctx.job_name(), "No load mappings configured");
            return Ok(());
        }

        let mut session = self.sink.connect(&db).context("connect to target database")?;
        let mut loaded = BTreeMap::new();
        for task in &tasks {
            if task.transaction {
                session.begin().context("begin transaction")?;
            }
            match load_task(&mut session, &data_dir, task, &mut loaded) {
                Ok(()) if task.transaction => session.commit().context("commit")?,
                Ok(()) => {}
                Err(e) => {
                    if task.transaction {
                        if let Err(rollback) = session.rollback() {
                            warn!(error = %rollback, "Rollback failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        ctx.attributes.loaded_tables = loaded;
        Ok(())
    }
}

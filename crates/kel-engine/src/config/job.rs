//! Per-job configuration (`jobs/<name>.yaml`)

use kel_common::{KelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Which mover handles a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "TABLE_EXTRACT", alias = "EXTRACT_KINGBASE")]
    TableExtract,
    #[serde(rename = "FILE_EXTRACT")]
    FileExtract,
    #[serde(rename = "TABLE_LOAD", alias = "KINGBASE_LOAD")]
    TableLoad,
    #[serde(rename = "FILE_LOAD")]
    FileLoad,
}

/// Pipeline direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Extract,
    Load,
}

impl JobType {
    pub fn kind(self) -> JobKind {
        match self {
            JobType::TableExtract | JobType::FileExtract => JobKind::Extract,
            JobType::TableLoad | JobType::FileLoad => JobKind::Load,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::TableExtract => "TABLE_EXTRACT",
            JobType::FileExtract => "FILE_EXTRACT",
            JobType::TableLoad => "TABLE_LOAD",
            JobType::FileLoad => "FILE_LOAD",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Extract => f.write_str("extract"),
            JobKind::Load => f.write_str("load"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub job: JobBasic,
    #[serde(default)]
    pub settings: JobSettings,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub tasks: Vec<TaskItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBasic {
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Job-level overrides of [`GlobalConfig`](super::GlobalConfig) blocks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub runtime: RuntimeSettings,
    pub work_dir: Option<PathBuf>,
    pub cleanup_work_dir: Option<bool>,
    pub compression: CompressionOverride,
    pub security: SecurityOverride,
    pub disk_protection: DiskProtectionOverride,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub table_concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_interval_sec: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOverride {
    pub algorithm: Option<String>,
    pub split_threshold_gb: Option<f64>,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityOverride {
    pub enable_encryption: Option<bool>,
    pub sm4_key: Option<String>,
}

impl std::fmt::Debug for SecurityOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityOverride")
            .field("enable_encryption", &self.enable_encryption)
            .field("sm4_key", &self.sm4_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskProtectionOverride {
    pub enabled: Option<bool>,
    pub min_free_space_gb: Option<f64>,
    pub min_free_space_percent: Option<f64>,
    pub fail_on_check_error: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub extract_database: Option<DatabaseConfig>,
    pub target_database: Option<DatabaseConfig>,
    pub extract_dir: ExtractDirs,
    pub load_dir: LoadDirs,
}

/// Connection settings handed to a table source or sink
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database_version: Option<String>,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database_version", &self.database_version)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractDirs {
    /// Source tree scanned by file extract jobs
    pub extract_dir: Option<PathBuf>,
    /// Root under which packages are published
    pub exchange_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadDirs {
    /// Root holding one directory per received batch
    pub input_dir: Option<PathBuf>,
    /// Destination tree for file load jobs
    pub target_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskMode {
    Full,
    Incremental,
    TruncateLoad,
    Append,
    Merge,
}

impl TaskMode {
    pub fn is_extract(self) -> bool {
        matches!(self, TaskMode::Full | TaskMode::Incremental)
    }

    pub fn is_load(self) -> bool {
        !self.is_extract()
    }
}

/// One entry of the job's `tasks` pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub mode: TaskMode,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub queries: Vec<QueryItem>,
    #[serde(default)]
    pub files: Option<FileSelection>,
    /// Load: data file key -> target table
    #[serde(default, alias = "interface_mapping")]
    pub mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub merge_sql: Option<String>,
    #[serde(default)]
    pub transaction: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryItem {
    pub name: String,
    pub sql: String,
}

/// File extract filters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSelection {
    pub pattern: Option<String>,
    /// `LAST_<N>_DAY`
    pub time_range: Option<String>,
    pub size_limit_mb: Option<u64>,
}

impl JobConfig {
    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn job_type(&self) -> JobType {
        self.job.job_type
    }

    pub fn extract_tasks(&self) -> impl Iterator<Item = &TaskItem> {
        self.tasks.iter().filter(|t| t.mode.is_extract())
    }

    pub fn load_tasks(&self) -> impl Iterator<Item = &TaskItem> {
        self.tasks.iter().filter(|t| t.mode.is_load())
    }

    /// Tables and named queries of the extract tasks, in configuration order
    pub fn exportable_tables(&self) -> Vec<String> {
        let mut names = Vec::new();
        for task in self.extract_tasks() {
            names.extend(task.tables.iter().cloned());
            names.extend(task.queries.iter().map(|q| q.name.clone()));
        }
        names
    }

    /// Distinct target tables of the load mappings
    pub fn loadable_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for table in self.load_tasks().flat_map(|t| t.mappings.values()) {
            if !names.contains(table) {
                names.push(table.clone());
            }
        }
        names
    }

    /// Copy of this job reduced to the `selected` tables.
    ///
    /// Extract jobs keep only the selected tables and named queries, each
    /// under its original task mode. Load jobs keep only mappings into
    /// the selected target tables; post-load queries are dropped while a
    /// task's `merge_sql` stays with its mappings. Unknown names are an error.
    pub fn select_tables(&self, selected: &[String]) -> Result<JobConfig> {
        if selected.is_empty() {
            return Ok(self.clone());
        }
        let known = match self.job_type().kind() {
            JobKind::Extract => self.exportable_tables(),
            JobKind::Load => self.loadable_tables(),
        };
        let unknown: Vec<&str> = selected
            .iter()
            .filter(|name| !known.contains(name))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(KelError::config(format!(
                "job '{}' has no table {}; available: {}",
                self.name(),
                unknown.join(", "),
                known.join(", ")
            )));
        }

        let mut job = self.clone();
        job.tasks = self
            .tasks
            .iter()
            .filter_map(|task| {
                let mut task = task.clone();
                if task.mode.is_extract() {
                    task.tables.retain(|t| selected.contains(t));
                    task.queries.retain(|q| selected.contains(&q.name));
                    (!task.tables.is_empty() || !task.queries.is_empty()).then_some(task)
                } else {
                    task.mappings.retain(|_, table| selected.contains(table));
                    task.queries.clear();
                    (!task.mappings.is_empty()).then_some(task)
                }
            })
            .collect();
        Ok(job)
    }
}

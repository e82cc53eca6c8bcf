//! State carried through one pipeline run

use crate::config::{JobKind, JobType, MergedConfig};
use kel_common::{KelError, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A data file written to the batch work directory by an extract mover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    /// `/`-separated path relative to the work directory, e.g. `data/t1.txt`
    pub name: String,
    pub table_name: Option<String>,
    pub row_count: Option<u64>,
}

/// A file placed into the target tree by a file load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapping {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Results that movers and stages hand to later stages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextAttributes {
    pub exported_files: Vec<ExportedFile>,
    pub file_mappings: Vec<FileMapping>,
    /// Target table -> rows loaded
    pub loaded_tables: BTreeMap<String, u64>,
    /// Package files published to the exchange directory
    pub published: Vec<PathBuf>,
}

impl ContextAttributes {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Identity, configuration and accumulated results of one task.
#[derive(Debug, Clone)]
pub struct TaskExecutionContext {
    task_id: u64,
    batch_number: String,
    config: MergedConfig,
    /// Set once this task created its exchange directory; survives retries
    owns_exchange_dir: bool,
    pub attributes: ContextAttributes,
}

impl TaskExecutionContext {
    pub fn new(task_id: u64, batch_number: impl Into<String>, config: MergedConfig) -> Self {
        Self {
            task_id,
            batch_number: batch_number.into(),
            config,
            owns_exchange_dir: false,
            attributes: ContextAttributes::default(),
        }
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn batch_number(&self) -> &str {
        &self.batch_number
    }

    pub fn job_name(&self) -> &str {
        self.config.job_name()
    }

    pub fn job_type(&self) -> JobType {
        self.config.job_type()
    }

    pub fn kind(&self) -> JobKind {
        self.job_type().kind()
    }

    pub fn config(&self) -> &MergedConfig {
        &self.config
    }

    /// `<work_root>/<job>/<batch>`
    pub fn work_dir(&self) -> PathBuf {
        self.config
            .work_root()
            .join(self.job_name())
            .join(&self.batch_number)
    }

    /// `<exchange_root>/<job>/<batch>`
    pub fn exchange_dir(&self) -> PathBuf {
        self.config
            .exchange_root()
            .join(self.job_name())
            .join(&self.batch_number)
    }

    pub fn owns_exchange_dir(&self) -> bool {
        self.owns_exchange_dir
    }

    pub(crate) fn claim_exchange_dir(&mut self) {
        self.owns_exchange_dir = true;
    }

    /// `<input_root>/<batch>`
    pub fn input_dir(&self) -> Result<PathBuf> {
        self.config
            .input_root()
            .map(|root| root.join(&self.batch_number))
            .ok_or_else(|| {
                KelError::config(format!(
                    "job '{}' has no resources.load_dir.input_dir",
                    self.job_name()
                ))
            })
    }
}

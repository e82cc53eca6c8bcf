//! Configuration model: global defaults, per-job overrides, and the merge
//! that produces a job's effective settings.

mod global;
mod job;
mod loader;

pub use global::{
    CompressionConfig, ConcurrencyConfig, DiskProtectionConfig, ExtractGlobalConfig,
    FileNamingConfig, GlobalConfig, RetryConfig, SecurityConfig,
};
pub use job::{
    CompressionOverride, DatabaseConfig, DiskProtectionOverride, ExtractDirs, FileSelection,
    JobBasic, JobConfig, JobKind, JobSettings, JobType, LoadDirs, QueryItem, Resources,
    RuntimeSettings, SecurityOverride, TaskItem, TaskMode,
};
pub use loader::{ConfigProvider, YamlConfigProvider};

use kel_common::types::gb_to_bytes;
use kel_common::{KelError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

const DEFAULT_WORK_ROOT: &str = "work";
const DEFAULT_EXCHANGE_ROOT: &str = "exchange";

/// Effective configuration of one job: global blocks with the job's
/// overrides applied field by field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedConfig {
    pub global: GlobalConfig,
    pub job: JobConfig,
}

impl MergedConfig {
    pub fn merge(mut global: GlobalConfig, job: JobConfig) -> Self {
        let settings = &job.settings;

        if let Some(n) = settings.runtime.table_concurrency {
            global.concurrency.default_table_concurrency = n;
        }
        if let Some(n) = settings.runtime.max_retries {
            global.retry.max_retries = n;
        }
        if let Some(n) = settings.runtime.retry_interval_sec {
            global.retry.retry_interval_sec = n;
        }

        if let Some(algorithm) = &settings.compression.algorithm {
            global.compression.algorithm = algorithm.clone();
        }
        if settings.compression.split_threshold_gb.is_some() {
            global.compression.split_threshold_gb = settings.compression.split_threshold_gb;
        }

        if let Some(enabled) = settings.security.enable_encryption {
            global.security.enable_encryption = enabled;
        }
        if settings.security.sm4_key.is_some() {
            global.security.sm4_key = settings.security.sm4_key.clone();
        }

        let disk = &settings.disk_protection;
        if let Some(enabled) = disk.enabled {
            global.disk_protection.enabled = enabled;
        }
        if disk.min_free_space_gb.is_some() {
            global.disk_protection.min_free_space_gb = disk.min_free_space_gb;
        }
        if disk.min_free_space_percent.is_some() {
            global.disk_protection.min_free_space_percent = disk.min_free_space_percent;
        }
        if let Some(fail) = disk.fail_on_check_error {
            global.disk_protection.fail_on_check_error = fail;
        }

        if let Some(cleanup) = settings.cleanup_work_dir {
            global.extract.cleanup_work_dir = cleanup;
        }

        Self { global, job }
    }

    /// Reject settings that can never produce a successful run.
    pub fn validate(&self, kind: JobKind) -> Result<()> {
        if self.job.name().trim().is_empty() {
            return Err(KelError::config("job.name must not be blank"));
        }
        if self.job.job_type().kind() != kind {
            return Err(KelError::config(format!(
                "job '{}' is a {} job and cannot run as {kind}",
                self.job.name(),
                self.job.job_type()
            )));
        }
        if self.global.concurrency.default_table_concurrency == 0 {
            return Err(KelError::config("table concurrency must be at least 1"));
        }
        if let Some(gb) = self.global.compression.split_threshold_gb {
            if !gb.is_finite() || gb <= 0.0 {
                return Err(KelError::config(format!(
                    "split_threshold_gb must be positive, got {gb}"
                )));
            }
        }
        self.encryption_key()?;

        match self.job.job_type() {
            JobType::TableLoad | JobType::FileLoad if self.input_root().is_none() => {
                return Err(KelError::config(format!(
                    "job '{}' has no resources.load_dir.input_dir",
                    self.job.name()
                )));
            }
            _ => {}
        }
        if self.job.job_type() == JobType::FileLoad && self.target_dir().is_none() {
            return Err(KelError::config(format!(
                "job '{}' has no resources.load_dir.target_dir",
                self.job.name()
            )));
        }
        Ok(())
    }

    /// Narrow the job to `tables`; see [`JobConfig::select_tables`].
    pub fn select_tables(mut self, tables: &[String]) -> Result<Self> {
        self.job = self.job.select_tables(tables)?;
        Ok(self)
    }

    pub fn job_name(&self) -> &str {
        self.job.name()
    }

    pub fn job_type(&self) -> JobType {
        self.job.job_type()
    }

    pub fn work_root(&self) -> PathBuf {
        self.job
            .settings
            .work_dir
            .clone()
            .or_else(|| self.global.extract.work_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_ROOT))
    }

    pub fn exchange_root(&self) -> PathBuf {
        self.job
            .resources
            .extract_dir
            .exchange_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EXCHANGE_ROOT))
    }

    pub fn input_root(&self) -> Option<&Path> {
        self.job.resources.load_dir.input_dir.as_deref()
    }

    pub fn target_dir(&self) -> Option<&Path> {
        self.job.resources.load_dir.target_dir.as_deref()
    }

    pub fn extract_source_dir(&self) -> Option<&Path> {
        self.job.resources.extract_dir.extract_dir.as_deref()
    }

    pub fn table_concurrency(&self) -> usize {
        self.global.concurrency.default_table_concurrency.max(1)
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.global.retry
    }

    pub fn disk_protection(&self) -> &DiskProtectionConfig {
        &self.global.disk_protection
    }

    pub fn file_naming(&self) -> Option<&FileNamingConfig> {
        self.global.file_naming.as_ref()
    }

    pub fn split_threshold_gb(&self) -> Option<f64> {
        self.global.compression.split_threshold_gb
    }

    /// Shard size in bytes, if splitting is configured
    pub fn split_threshold_bytes(&self) -> Option<u64> {
        self.split_threshold_gb()
            .map(gb_to_bytes)
            .filter(|bytes| *bytes > 0)
    }

    pub fn encryption_enabled(&self) -> bool {
        self.global.security.enable_encryption
    }

    /// The SM4 key when encryption is enabled; a missing key is an error.
    pub fn encryption_key(&self) -> Result<Option<&str>> {
        if !self.encryption_enabled() {
            return Ok(None);
        }
        match self.global.security.sm4_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(Some(key)),
            _ => Err(KelError::config(
                "encryption is enabled but security.sm4_key is not set",
            )),
        }
    }

    pub fn cleanup_work_dir(&self) -> bool {
        self.global.extract.cleanup_work_dir
    }

    /// JSON copy of the effective settings with keys and passwords blanked
    pub fn redacted_snapshot(&self) -> serde_json::Value {
        let mut copy = self.clone();
        copy.global.security.sm4_key = None;
        copy.job.settings.security.sm4_key = None;
        for db in [
            &mut copy.job.resources.extract_database,
            &mut copy.job.resources.target_database,
        ]
        .into_iter()
        .flatten()
        {
            db.password = None;
        }
        serde_json::to_value(&copy).unwrap_or(serde_json::Value::Null)
    }
}

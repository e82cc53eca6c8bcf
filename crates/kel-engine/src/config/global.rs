//! Environment-wide defaults (`global.yaml`)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Global configuration shared by every job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub compression: CompressionConfig,
    pub security: SecurityConfig,
    pub extract: ExtractGlobalConfig,
    pub file_naming: Option<FileNamingConfig>,
    pub disk_protection: DiskProtectionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Export units run in parallel per table-extract job
    pub default_table_concurrency: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            default_table_concurrency: 1,
        }
    }
}

/// Whole-attempt retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(alias = "maxRetries")]
    pub max_retries: u32,
    #[serde(alias = "retryIntervalSec")]
    pub retry_interval_sec: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_interval_sec: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub algorithm: String,
    /// Archives larger than this are split into `.NNN` shards
    pub split_threshold_gb: Option<f64>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: "gzip".to_string(),
            split_threshold_gb: None,
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub sm4_key: Option<String>,
    pub enable_encryption: bool,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("sm4_key", &self.sm4_key.as_ref().map(|_| "<redacted>"))
            .field("enable_encryption", &self.enable_encryption)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractGlobalConfig {
    pub work_dir: Option<PathBuf>,
    /// Informational; batches are always numbered `yyyyMMdd_NNN`
    pub batch_number_format: Option<String>,
    /// Source character set, kept in the config snapshot
    pub encoding: Option<String>,
    pub cleanup_work_dir: bool,
}

/// Standard data file naming: `<SYS>_<IFACE>_<VER>_<yyyyMMdd>_<NNN>_<Z|Q>.TXT`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileNamingConfig {
    pub enable_standard_naming: bool,
    pub system_code: Option<String>,
    pub version: Option<String>,
    pub table_interface_mapping: BTreeMap<String, String>,
    pub sql_interface_mapping: BTreeMap<String, String>,
}

/// Pre-flight disk space thresholds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskProtectionConfig {
    pub enabled: bool,
    pub min_free_space_gb: Option<f64>,
    pub min_free_space_percent: Option<f64>,
    /// Refuse to run when the disk space query itself fails
    pub fail_on_check_error: bool,
}

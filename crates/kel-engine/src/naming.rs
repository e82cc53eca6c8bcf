//! Data file names for exported tables and queries

use crate::config::FileNamingConfig;
use chrono::NaiveDate;

const DEFAULT_SYSTEM_CODE: &str = "SYS";
const DEFAULT_INTERFACE: &str = "J9999";
const DEFAULT_VERSION: &str = "V01";

/// What an export unit reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Table,
    Query,
}

/// Picks data file names according to the optional naming policy.
#[derive(Debug, Clone, Default)]
pub struct FileNaming {
    policy: Option<FileNamingConfig>,
}

impl FileNaming {
    pub fn new(policy: Option<FileNamingConfig>) -> Self {
        Self { policy }
    }

    /// File name for unit number `seq` (1-based) exported on `date`.
    pub fn file_name(
        &self,
        kind: UnitKind,
        name: &str,
        seq: usize,
        incremental: bool,
        date: NaiveDate,
    ) -> String {
        match &self.policy {
            Some(policy) if policy.enable_standard_naming => {
                standard_name(policy, kind, name, seq, incremental, date)
            }
            _ => simple_name(name),
        }
    }
}

/// `<SYS>_<IFACE>_<VER>_<yyyyMMdd>_<NNN>_<Z|Q>.TXT`
pub fn standard_name(
    policy: &FileNamingConfig,
    kind: UnitKind,
    name: &str,
    seq: usize,
    incremental: bool,
    date: NaiveDate,
) -> String {
    let mapping = match kind {
        UnitKind::Table => &policy.table_interface_mapping,
        UnitKind::Query => &policy.sql_interface_mapping,
    };
    let system = policy.system_code.as_deref().unwrap_or(DEFAULT_SYSTEM_CODE);
    let interface = mapping.get(name).map(String::as_str).unwrap_or(DEFAULT_INTERFACE);
    let version = policy.version.as_deref().unwrap_or(DEFAULT_VERSION);
    let flag = if incremental { 'Z' } else { 'Q' };
    format!(
        "{system}_{interface}_{version}_{}_{seq:03}_{flag}.TXT",
        date.format("%Y%m%d")
    )
}

/// `<name with '.' replaced by '_'>.txt`
pub fn simple_name(name: &str) -> String {
    format!("{}.txt", name.replace('.', "_"))
}

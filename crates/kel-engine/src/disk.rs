//! Free-space gate run before a pipeline touches its directories

use crate::config::DiskProtectionConfig;
use kel_common::types::bytes_to_gb;
use kel_common::{IoResultExt, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw capacity figures for the filesystem holding a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub total: u64,
    pub available: u64,
}

/// Source of filesystem capacity figures
pub trait DiskStats: Send + Sync {
    fn space(&self, path: &Path) -> io::Result<DiskSpace>;
}

/// Queries the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDisk;

impl DiskStats for SystemDisk {
    fn space(&self, path: &Path) -> io::Result<DiskSpace> {
        Ok(DiskSpace {
            total: fs2::total_space(path)?,
            available: fs2::available_space(path)?,
        })
    }
}

impl<P: DiskStats + ?Sized> DiskStats for Arc<P> {
    fn space(&self, path: &Path) -> io::Result<DiskSpace> {
        (**self).space(path)
    }
}

/// Human-facing view of [`DiskSpace`]
#[derive(Debug, Clone, PartialEq)]
pub struct DiskSpaceInfo {
    pub path: PathBuf,
    pub total_gb: f64,
    pub usable_gb: f64,
    pub used_gb: f64,
    pub usable_percent: f64,
    pub used_percent: f64,
}

pub struct DiskSpaceGate<P = SystemDisk> {
    policy: DiskProtectionConfig,
    stats: P,
}

impl DiskSpaceGate<SystemDisk> {
    pub fn new(policy: DiskProtectionConfig) -> Self {
        Self::with_stats(policy, SystemDisk)
    }
}

impl<P: DiskStats> DiskSpaceGate<P> {
    pub fn with_stats(policy: DiskProtectionConfig, stats: P) -> Self {
        Self { policy, stats }
    }

    /// Whether `path` has enough free space under the configured thresholds.
    ///
    /// Always passes when protection is disabled. A failing space query passes
    /// unless `fail_on_check_error` is set.
    pub fn check(&self, path: &Path) -> bool {
        if !self.policy.enabled {
            return true;
        }
        let target = existing_ancestor(path);
        let space = match self.stats.space(&target) {
            Ok(space) => space,
            Err(e) => {
                warn!(path = %target.display(), error = %e, "Disk space query failed");
                return !self.policy.fail_on_check_error;
            }
        };

        let usable_gb = bytes_to_gb(space.available);
        let usable_percent = percent(space.available, space.total);
        debug!(
            path = %target.display(),
            usable_gb = %format!("{usable_gb:.2}"),
            usable_percent = %format!("{usable_percent:.2}"),
            "Disk space"
        );

        if let Some(min_gb) = self.policy.min_free_space_gb {
            if usable_gb < min_gb {
                warn!(
                    path = %target.display(),
                    usable_gb = %format!("{usable_gb:.2}"),
                    min_gb,
                    "Free space below minimum"
                );
                return false;
            }
        }
        if let Some(min_percent) = self.policy.min_free_space_percent {
            if usable_percent < min_percent {
                warn!(
                    path = %target.display(),
                    usable_percent = %format!("{usable_percent:.2}"),
                    min_percent,
                    "Free space percentage below minimum"
                );
                return false;
            }
        }
        true
    }

    /// Every path must pass.
    pub fn check_paths<Q: AsRef<Path>>(&self, paths: &[Q]) -> bool {
        paths.iter().all(|p| self.check(p.as_ref()))
    }

    pub fn space_info(&self, path: &Path) -> Result<DiskSpaceInfo> {
        let target = existing_ancestor(path);
        let space = self.stats.space(&target).at_path(&target)?;
        Ok(DiskSpaceInfo {
            total_gb: bytes_to_gb(space.total),
            usable_gb: bytes_to_gb(space.available),
            used_gb: bytes_to_gb(space.total.saturating_sub(space.available)),
            usable_percent: percent(space.available, space.total),
            used_percent: percent(space.total.saturating_sub(space.available), space.total),
            path: target,
        })
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Nearest existing ancestor of `path`, made absolute.
fn existing_ancestor(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut current = absolute.as_path();
    loop {
        if current.exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return PathBuf::from("."),
        }
    }
}

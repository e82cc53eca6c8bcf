//! Configuration management for KEL CLI
//!
//! Settings are layered: built-in defaults, then an optional `kel.yaml` in the
//! working directory, then `KEL_*` environment variables (a `.env` file is
//! loaded first), then command-line flags.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// CLI Configuration Constants
// ============================================================================

/// Default configuration directory, relative to the working directory.
pub const DEFAULT_CONF_DIR: &str = "conf";

/// Default interval between task progress polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Settings file looked up in the working directory.
pub const SETTINGS_FILE: &str = "kel.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding `global.yaml` and `jobs/`
    pub conf_dir: PathBuf,

    /// Progress poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from(DEFAULT_CONF_DIR),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Settings {
    /// Load `.env`, then layer `kel.yaml` and `KEL_*` variables over the defaults.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(Path::new(SETTINGS_FILE))
    }

    /// Like [`Settings::load`] with an explicit settings file and no `.env`.
    pub fn load_from(file: &Path) -> Result<Self> {
        let layered = config::Config::builder()
            .set_default("conf_dir", DEFAULT_CONF_DIR)?
            .set_default("poll_interval_ms", DEFAULT_POLL_INTERVAL_MS)?
            .add_source(config::File::from(file).required(false))
            .add_source(config::Environment::with_prefix("KEL"))
            .build()?;
        Ok(layered.try_deserialize()?)
    }

    /// Apply the `--conf-dir` flag, if given.
    pub fn with_conf_dir(mut self, conf_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = conf_dir {
            self.conf_dir = dir;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

//! Configuration sources

use super::{GlobalConfig, JobConfig, MergedConfig};
use kel_common::{IoResultExt, KelError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of global and per-job configuration
pub trait ConfigProvider: Send + Sync {
    fn load_global(&self) -> Result<GlobalConfig>;

    fn load_job(&self, job_name: &str) -> Result<JobConfig>;

    /// Names of every job this provider knows, sorted
    fn list_jobs(&self) -> Result<Vec<String>>;

    fn load_merged(&self, job_name: &str) -> Result<MergedConfig> {
        Ok(MergedConfig::merge(
            self.load_global()?,
            self.load_job(job_name)?,
        ))
    }
}

/// Reads `<conf_dir>/global.yaml` and `<conf_dir>/jobs/<name>.yaml`
#[derive(Debug, Clone)]
pub struct YamlConfigProvider {
    conf_dir: PathBuf,
}

impl YamlConfigProvider {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
        }
    }

    pub fn conf_dir(&self) -> &Path {
        &self.conf_dir
    }

    fn jobs_dir(&self) -> PathBuf {
        self.conf_dir.join("jobs")
    }

    fn job_path(&self, job_name: &str) -> Result<PathBuf> {
        let valid = !job_name.is_empty()
            && job_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !job_name.starts_with('.');
        if !valid {
            return Err(KelError::config(format!("invalid job name '{job_name}'")));
        }
        Ok(self.jobs_dir().join(format!("{job_name}.yaml")))
    }
}

impl ConfigProvider for YamlConfigProvider {
    fn load_global(&self) -> Result<GlobalConfig> {
        let path = self.conf_dir.join("global.yaml");
        if !path.exists() {
            debug!(path = %path.display(), "No global.yaml, using defaults");
            return Ok(GlobalConfig::default());
        }
        let content = std::fs::read_to_string(&path).at_path(&path)?;
        if content.trim().is_empty() {
            return Ok(GlobalConfig::default());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| KelError::config(format!("{}: {e}", path.display())))
    }

    fn load_job(&self, job_name: &str) -> Result<JobConfig> {
        let path = self.job_path(job_name)?;
        if !path.exists() {
            return Err(KelError::config(format!(
                "job '{job_name}' not found (expected {})",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(&path).at_path(&path)?;
        let job: JobConfig = serde_yaml::from_str(&content)
            .map_err(|e| KelError::config(format!("{}: {e}", path.display())))?;

        if job.name() != job_name {
            return Err(KelError::config(format!(
                "{} declares job.name '{}', expected '{job_name}'",
                path.display(),
                job.name()
            )));
        }
        Ok(job)
    }

    fn list_jobs(&self) -> Result<Vec<String>> {
        let dir = self.jobs_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).at_path(&dir)? {
            let path = entry.at_path(&dir)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

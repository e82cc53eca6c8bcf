//! `kel jobs` command implementation

use super::find_job;
use crate::config::Settings;
use crate::error::Result;
use colored::Colorize;
use kel_engine::{ConfigProvider, JobKind, YamlConfigProvider};

/// List configured jobs with their types
pub async fn run(settings: &Settings) -> Result<()> {
    let provider = YamlConfigProvider::new(&settings.conf_dir);
    let names = provider.list_jobs()?;

    if names.is_empty() {
        println!("No jobs found in {}.", settings.conf_dir.join("jobs").display());
        println!("Add a <name>.yaml job file there to get started.");
        return Ok(());
    }

    println!("{}", "Configured Jobs:".cyan().bold());
    println!();
    for name in &names {
        match provider.load_job(name) {
            Ok(job) => {
                println!("{}", name.green());
                println!("  Type: {}", job.job_type());
                if let Some(description) = job.job.description.as_deref().filter(|d| !d.is_empty()) {
                    println!("  Description: {description}");
                }
            }
            Err(e) => {
                println!("{}", name.red());
                println!("  Invalid: {e}");
            }
        }
    }
    println!();
    println!("Total jobs: {}", names.len());
    Ok(())
}

/// List the tables `kel extract/load --table` accepts for `job`
pub async fn tables(settings: &Settings, job: &str) -> Result<()> {
    let provider = YamlConfigProvider::new(&settings.conf_dir);
    let config = find_job(&provider, job)?;
    let kind = config.job_type().kind();
    let names = match kind {
        JobKind::Extract => config.exportable_tables(),
        JobKind::Load => config.loadable_tables(),
    };

    if names.is_empty() {
        println!("Job '{job}' has no tables configured.");
        return Ok(());
    }
    let heading = match kind {
        JobKind::Extract => "Exportable tables:",
        JobKind::Load => "Loadable tables:",
    };
    println!("{} {}", job.green().bold(), format!("({})", config.job_type()).as_str().dimmed());
    println!("{}", heading.cyan().bold());
    for name in &names {
        println!("  {name}");
    }
    Ok(())
}

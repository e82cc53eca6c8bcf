//! `kel load` command implementation

use super::run_job;
use crate::config::Settings;
use crate::error::Result;
use colored::Colorize;
use kel_engine::store::LogLevel;
use kel_engine::JobKind;

/// Load a batch and report what went where
pub async fn run(
    settings: &Settings,
    job: &str,
    batch: Option<&str>,
    tables: &[String],
) -> Result<()> {
    let finished = run_job(settings, job, JobKind::Load, batch, tables).await?;
    let ctx = &finished.ctx;

    println!("{} Load '{}' completed", "✓".green().bold(), job.bold());
    println!("  Batch: {}", ctx.batch_number().cyan());

    if !ctx.attributes.loaded_tables.is_empty() {
        println!();
        println!("{}", "Tables:".cyan().bold());
        for (table, rows) in &ctx.attributes.loaded_tables {
            println!("  {table:<40} {rows:>12} rows");
        }
    }
    if !ctx.attributes.file_mappings.is_empty() {
        println!();
        println!(
            "{} {} files restored",
            "Files:".cyan().bold(),
            ctx.attributes.file_mappings.len()
        );
        if let Some(target) = ctx.config().target_dir() {
            println!("  Target: {}", target.display());
        }
    }
    let warnings = finished.record.as_ref().map_or(0, |r| {
        r.execution_log
            .iter()
            .filter(|e| e.log_level == LogLevel::Warn)
            .count()
    });
    if warnings > 0 {
        println!();
        println!(
            "{} {warnings} warning(s) recorded, rerun with --verbose for details",
            "!".yellow().bold()
        );
    }
    Ok(())
}

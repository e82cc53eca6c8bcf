//! `kel extract` command implementation

use super::run_job;
use crate::config::Settings;
use crate::error::Result;
use colored::Colorize;
use kel_common::types::format_bytes;
use kel_engine::JobKind;

/// Run an extract job and report what was published
pub async fn run(settings: &Settings, job: &str, tables: &[String]) -> Result<()> {
    let finished = run_job(settings, job, JobKind::Extract, None, tables).await?;
    let ctx = &finished.ctx;

    println!("{} Extract '{}' completed", "✓".green().bold(), job.bold());
    println!("  Batch:    {}", ctx.batch_number().cyan());
    println!("  Exchange: {}", ctx.exchange_dir().display());
    println!("  Exported: {} files", ctx.attributes.exported_files.len());

    let rows: u64 = ctx
        .attributes
        .exported_files
        .iter()
        .filter_map(|f| f.row_count)
        .sum();
    if rows > 0 {
        println!("  Rows:     {rows}");
    }

    println!();
    println!("{}", "Package:".cyan().bold());
    for part in &ctx.attributes.published {
        let size = std::fs::metadata(part).map(|m| m.len()).unwrap_or(0);
        let name = part
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("  {name} ({})", format_bytes(size));
    }
    if let Some(record) = &finished.record {
        if let (Some(start), Some(end)) = (record.start_time, record.end_time) {
            let secs = (end - start).num_milliseconds() as f64 / 1000.0;
            println!("  Duration: {secs:.1}s");
        }
    }
    Ok(())
}

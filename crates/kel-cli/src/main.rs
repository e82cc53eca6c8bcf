//! KEL CLI - Main entry point

use clap::Parser;
use colored::Colorize;
use kel_cli::{Cli, Commands, JobsCommand, Settings};
use kel_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Verbose mode logs debug to the console, otherwise only warnings
    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("kel")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // CLI should work without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> kel_cli::Result<()> {
    let settings = Settings::load()?.with_conf_dir(cli.conf_dir.clone());

    match &cli.command {
        Commands::Extract { job, tables } => {
            kel_cli::commands::extract::run(&settings, job, tables).await
        }
        Commands::Load { job, batch, tables } => {
            kel_cli::commands::load::run(&settings, job, batch.as_deref(), tables).await
        }
        Commands::Jobs { command } => match command {
            None | Some(JobsCommand::List) => kel_cli::commands::jobs::run(&settings).await,
            Some(JobsCommand::Tables { job }) => {
                kel_cli::commands::jobs::tables(&settings, job).await
            }
        },
        Commands::Verify { dir } => kel_cli::commands::verify::run(dir).await,
        Commands::Checksum { files } => kel_cli::commands::checksum::run(files).await,
    }
}

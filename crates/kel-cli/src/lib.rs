//! KEL CLI Library
//!
//! Command-line front end for the KEL extract/load engine.
//!
//! # Overview
//!
//! - **Extract**: run an extract job and publish its package (`kel extract`)
//! - **Load**: load a published batch into its target (`kel load`)
//! - **Jobs**: list the jobs in the configuration directory (`kel jobs`) and
//!   the tables a job can move (`kel jobs tables`)
//! - **Verification**: check a package or work directory against its manifest (`kel verify`)
//! - **Checksums**: print SM3 digests of arbitrary files (`kel checksum`)

pub mod commands;
pub mod config;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use config::Settings;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// KEL - batch extract/load between isolated environments
#[derive(Parser, Debug)]
#[command(name = "kel")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding global.yaml and jobs/*.yaml
    #[arg(long, env = "KEL_CONF_DIR", global = true)]
    pub conf_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an extract job and publish a new batch
    Extract {
        /// Job name (file stem under jobs/)
        job: String,

        /// Export only these tables or named queries (comma-separated)
        #[arg(short, long = "table", value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Load a published batch
    Load {
        /// Job name (file stem under jobs/)
        job: String,

        /// Batch to load (defaults to the latest one under the input directory)
        #[arg(short, long)]
        batch: Option<String>,

        /// Load only into these target tables (comma-separated)
        #[arg(short, long = "table", value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// List configured jobs
    Jobs {
        #[command(subcommand)]
        command: Option<JobsCommand>,
    },

    /// Check a directory against its manifest.json
    Verify {
        /// Package directory or unpacked work directory
        dir: PathBuf,
    },

    /// Print SM3 digests of files
    Checksum {
        /// Files to digest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Job inspection subcommands
#[derive(Subcommand, Debug)]
pub enum JobsCommand {
    /// List configured jobs (the default)
    List,

    /// List the tables a job can export or load
    Tables {
        /// Job name (file stem under jobs/)
        job: String,
    },
}

//! Build automation tasks for KEL
//!
//! Currently generates the CLI reference from the clap definitions.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for KEL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<kel_cli::Cli>();

    let content = format!(
        r#"# KEL CLI Reference

Generated from the CLI source code on {}.

## Overview

`kel` moves table and file data between isolated environments in batches.
An extract job exports data, packs it into `<job>_<batch>.tar.gz`, optionally
splits and SM4-encrypts it, and publishes it with an SM3 manifest. A load job
verifies, decrypts, merges and unpacks a published batch and loads it into its
target.

## Quick Start

```bash
# List the jobs under ./conf/jobs
kel jobs

# Publish a new batch
kel extract daily_docs

# Check a received package before loading
kel verify /data/exchange/daily_docs/20240301_001

# Load the latest batch, or a specific one
kel load daily_docs_in
kel load daily_docs_in --batch 20240301_001
```

## Commands

{}

## Configuration

Job files live in `<conf-dir>/jobs/<name>.yaml`; shared defaults in
`<conf-dir>/global.yaml`. Job `settings` override the global blocks field by
field.

```yaml
job:
  type: FILE_EXTRACT
  name: daily_docs
settings:
  work_dir: /data/work
  compression:
    split_threshold_gb: 2
  security:
    enable_encryption: true
    sm4_key: "0123456789abcdef"
resources:
  extract_dir:
    extract_dir: /data/outgoing
    exchange_dir: /data/exchange
tasks:
  - mode: FULL
    files:
      pattern: "*.pdf"
      time_range: LAST_1_DAY
```

## Environment Variables

- `KEL_CONF_DIR` - Configuration directory (default: `conf`)
- `KEL_POLL_INTERVAL_MS` - Progress refresh interval (default: `200`)
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR` - Logging overrides

---

*This documentation is automatically generated. To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("✅ Generated CLI documentation at: {}", file_path.display());
    Ok(())
}

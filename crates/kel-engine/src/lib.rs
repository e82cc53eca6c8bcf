//! KEL Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Batch extract/load pipelines for moving table and file data between
//! isolated environments.
//!
//! # Architecture
//!
//! - **Configuration** ([`config`]): global defaults merged with per-job YAML
//! - **Orchestration** ([`orchestrator`]): runs the extract pipeline
//!   (export, manifest, compress, split, encrypt, deliver) and the load
//!   pipeline (decrypt, merge, unpack, validate, load)
//! - **Movers** ([`plugin`]): pluggable data movement per job type
//! - **Task tracking** ([`store`], [`state`], [`task_log`], [`progress`],
//!   [`metrics`]): status, progress and statistics of every run
//! - **Packaging** ([`packaging`], [`crypto`], [`manifest`], [`delivery`]):
//!   archive format, SM4 encryption, SM3 manifests, atomic publishing
//!
//! # Example
//!
//! ```no_run
//! use kel_engine::config::YamlConfigProvider;
//! use kel_engine::orchestrator::Orchestrator;
//! use kel_engine::store::InMemoryTaskStore;
//! use std::sync::Arc;
//!
//! fn run() -> kel_common::Result<()> {
//!     let provider = YamlConfigProvider::new("conf");
//!     let orchestrator = Arc::new(Orchestrator::new(Arc::new(InMemoryTaskStore::new())));
//!     let handle = orchestrator.trigger(&provider, "daily_docs", None)?;
//!     let ctx = handle.join()?;
//!     println!("published {:?}", ctx.attributes.published);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod context;
pub mod crypto;
pub mod delivery;
pub mod disk;
pub mod fs;
pub mod manifest;
pub mod metrics;
pub mod naming;
pub mod orchestrator;
pub mod packaging;
pub mod plugin;
pub mod progress;
pub mod retry;
pub mod state;
pub mod store;
pub mod task_log;

pub use config::{ConfigProvider, JobKind, JobType, MergedConfig, YamlConfigProvider};
pub use context::TaskExecutionContext;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, TaskHandle};
pub use store::{InMemoryTaskStore, TaskRecord, TaskStatus, TaskStore};

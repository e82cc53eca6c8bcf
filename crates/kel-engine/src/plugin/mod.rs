//! Movers: the pluggable data-moving step of each pipeline

mod file;
mod table;

pub use file::{FileExtractMover, FileLoadMover, FILES_DIR};
pub use table::{
    collect_units, copy_in_statement, resolve_data_file, ExportUnit, PooledSession, SessionPool,
    SinkSession, SourceSession, TableExtractMover, TableLoadMover, TableSink, TableSource,
    DATA_DIR, FIELD_DELIMITER,
};

use crate::context::TaskExecutionContext;
use std::sync::Arc;

/// Moves data for the job types it supports.
///
/// Extract movers write into the batch work directory and record what they
/// wrote in the context; load movers read the unpacked work directory.
pub trait Mover: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, ctx: &TaskExecutionContext) -> bool;

    fn run(&self, ctx: &mut TaskExecutionContext) -> anyhow::Result<()>;
}

/// Ordered set of movers; the first that supports a context wins.
#[derive(Clone, Default)]
pub struct MoverRegistry {
    movers: Vec<Arc<dyn Mover>>,
}

impl MoverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mover: Arc<dyn Mover>) {
        self.movers.push(mover);
    }

    pub fn select(&self, ctx: &TaskExecutionContext) -> Option<Arc<dyn Mover>> {
        self.movers.iter().find(|m| m.supports(ctx)).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.movers.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.movers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movers.is_empty()
    }
}

impl std::fmt::Debug for MoverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

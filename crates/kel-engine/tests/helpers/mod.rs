//! Fixtures shared by the pipeline tests
#![allow(dead_code)]

use anyhow::bail;
use kel_engine::config::{DatabaseConfig, GlobalConfig, JobConfig, MergedConfig};
use kel_engine::plugin::{ExportUnit, SinkSession, SourceSession, TableSink, TableSource, FIELD_DELIMITER};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub fn merged(yaml: &str) -> MergedConfig {
    let job: JobConfig = serde_yaml::from_str(yaml).expect("job yaml");
    MergedConfig::merge(GlobalConfig::default(), job)
}

/// Deterministic incompressible bytes
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

pub fn write_file(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, content).expect("write");
}

/// Source that writes `rows` lines per unit after `failures` refused connections
#[derive(Clone, Default)]
pub struct FakeSource {
    pub rows: u64,
    pub failures: Arc<AtomicU32>,
    pub connects: Arc<AtomicU32>,
}

impl FakeSource {
    pub fn new(rows: u64) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    pub fn failing(rows: u64, failures: u32) -> Self {
        let source = Self::new(rows);
        source.failures.store(failures, Ordering::SeqCst);
        source
    }
}

pub struct FakeSession {
    rows: u64,
}

impl TableSource for FakeSource {
    type Session = FakeSession;

    fn connect(&self, _db: &DatabaseConfig) -> anyhow::Result<FakeSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            bail!("connection refused");
        }
        Ok(FakeSession { rows: self.rows })
    }
}

impl SourceSession for FakeSession {
    fn export(&mut self, unit: &ExportUnit, out: &mut dyn Write) -> anyhow::Result<u64> {
        for i in 0..self.rows {
            write!(out, "{i}")?;
            out.write_all(&[FIELD_DELIMITER])?;
            writeln!(out, "{}", unit.name)?;
        }
        Ok(self.rows)
    }
}

/// Sink that records every call as a line of text
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub log: Arc<Mutex<Vec<String>>>,
}

pub struct RecordingSession {
    log: Arc<Mutex<Vec<String>>>,
}

impl TableSink for RecordingSink {
    type Session = RecordingSession;

    fn connect(&self, _db: &DatabaseConfig) -> anyhow::Result<RecordingSession> {
        Ok(RecordingSession {
            log: self.log.clone(),
        })
    }
}

impl SinkSession for RecordingSession {
    fn begin(&mut self) -> anyhow::Result<()> {
        self.log.lock().push("BEGIN".into());
        Ok(())
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        self.log.lock().push("COMMIT".into());
        Ok(())
    }

    fn rollback(&mut self) -> anyhow::Result<()> {
        self.log.lock().push("ROLLBACK".into());
        Ok(())
    }

    fn truncate(&mut self, table: &str) -> anyhow::Result<()> {
        self.log.lock().push(format!("TRUNCATE {table}"));
        Ok(())
    }

    fn copy_in(&mut self, table: &str, data: &mut dyn Read) -> anyhow::Result<u64> {
        let rows = BufReader::new(data).lines().count() as u64;
        self.log.lock().push(format!("COPY {table} {rows}"));
        Ok(rows)
    }

    fn execute(&mut self, sql: &str) -> anyhow::Result<()> {
        self.log.lock().push(format!("EXEC {sql}"));
        Ok(())
    }
}

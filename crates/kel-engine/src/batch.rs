//! Batch numbers: `yyyyMMdd_NNN`, sequence restarting each day

use chrono::{Local, NaiveDate};
use kel_common::{IoResultExt, KelError, Result};
use parking_lot::Mutex;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

// literal pattern, checked by the tests below
#[allow(clippy::unwrap_used)]
static BATCH_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{8})(\d{6})?_(\d{3,})$").unwrap());

pub fn date_prefix(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

pub fn today_prefix() -> String {
    date_prefix(Local::now().date_naive())
}

/// Issues batch numbers for one process.
///
/// The sequence always moves past the floor the caller passes in, the
/// highest number already recorded or published for the day, so a
/// restarted process does not reuse numbers.
#[derive(Debug, Default)]
pub struct BatchNumberGenerator {
    state: Mutex<Option<(NaiveDate, u32)>>,
}

impl BatchNumberGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next number for today; `issued_today` is the highest sequence already taken.
    pub fn next(&self, issued_today: usize) -> String {
        self.next_for(Local::now().date_naive(), issued_today)
    }

    pub fn next_for(&self, date: NaiveDate, issued_today: usize) -> String {
        let floor = u32::try_from(issued_today).unwrap_or(u32::MAX);
        let mut state = self.state.lock();
        let last = match *state {
            Some((day, seq)) if day == date => seq,
            _ => 0,
        };
        let seq = last.max(floor).saturating_add(1);
        *state = Some((date, seq));
        format!("{}_{seq:03}", date_prefix(date))
    }
}

/// `(date, time, sequence)` of a batch directory name
pub fn parse_batch(name: &str) -> Option<(&str, Option<&str>, u32)> {
    let caps = BATCH_DIR.captures(name)?;
    let date = caps.get(1)?.as_str();
    let time = caps.get(2).map(|m| m.as_str());
    let seq = caps.get(3)?.as_str().parse().ok()?;
    Some((date, time, seq))
}

/// Highest sequence among batch directories under `root` dated `prefix`.
///
/// A missing `root` has none.
pub fn highest_sequence(root: &Path, prefix: &str) -> Result<u32> {
    if !root.is_dir() {
        return Ok(0);
    }
    let mut highest = 0;
    for entry in std::fs::read_dir(root).at_path(root)? {
        let entry = entry.at_path(root)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some((date, _, seq)) = parse_batch(&name) {
            if date == prefix {
                highest = highest.max(seq);
            }
        }
    }
    Ok(highest)
}

/// Most recent batch directory under `input_root`.
pub fn resolve_latest_batch(input_root: &Path) -> Result<String> {
    if !input_root.is_dir() {
        return Err(KelError::config(format!(
            "input directory not found: {}",
            input_root.display()
        )));
    }
    let mut latest: Option<((String, String, u32), String)> = None;
    for entry in std::fs::read_dir(input_root).at_path(input_root)? {
        let entry = entry.at_path(input_root)?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((date, time, seq)) = parse_batch(&name) else {
            continue;
        };
        let key = (date.to_string(), time.unwrap_or("").to_string(), seq);
        if latest.as_ref().is_none_or(|(best, _)| key > *best) {
            latest = Some((key, name));
        }
    }
    latest.map(|(_, name)| name).ok_or_else(|| {
        KelError::config(format!("no batch directories in {}", input_root.display()))
    })
}

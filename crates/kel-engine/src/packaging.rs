//! tar.gz packaging, fixed-size sharding and guarded extraction

use crate::delivery::Delivery;
use crate::fs::{ensure_dir, list_files, relative_name, safe_join};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use kel_common::{IoResultExt, KelError, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
const COPY_BUFFER_SIZE: usize = 1024 * 1024;
const MAX_SHARDS: u64 = 999;

/// `<job>_<batch>.tar.gz`
pub fn archive_name(job_name: &str, batch_number: &str) -> String {
    format!("{job_name}_{batch_number}{ARCHIVE_SUFFIX}")
}

/// Shard index of a `*.tar.gz.NNN` file name
pub fn shard_index(name: &str) -> Option<u32> {
    let (base, suffix) = name.rsplit_once('.')?;
    if !base.ends_with(ARCHIVE_SUFFIX) || suffix.len() != 3 {
        return None;
    }
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Whether `name` is a publishable package file (archive or shard)
pub fn is_package_file(name: &str) -> bool {
    name.ends_with(ARCHIVE_SUFFIX) || shard_index(name).is_some()
}

/// Pack every regular file under `source_dir` into a gzip tarball at
/// `archive`, with `/`-separated paths relative to `source_dir`.
///
/// Returns the number of files packed.
pub fn pack(source_dir: &Path, archive: &Path) -> Result<usize> {
    if !source_dir.is_dir() {
        return Err(KelError::packaging(format!(
            "source directory not found: {}",
            source_dir.display()
        )));
    }
    if let Some(parent) = archive.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let file = File::create(archive).at_path(archive)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);

    let mut count = 0;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| KelError::packaging(e.to_string()))?;
        if !entry.file_type().is_file() || entry.path() == archive {
            continue;
        }
        let Some(name) = relative_name(source_dir, entry.path()) else {
            continue;
        };
        builder
            .append_path_with_name(entry.path(), &name)
            .at_path(entry.path())?;
        count += 1;
    }

    let encoder = builder.into_inner().at_path(archive)?;
    let mut writer = encoder.finish().at_path(archive)?;
    writer.flush().at_path(archive)?;

    debug!(archive = %archive.display(), files = count, "Packed");
    Ok(count)
}

/// Split `archive` into `<archive>.001`, `.002`, ... of at most
/// `threshold` bytes each and remove the original.
///
/// An archive no larger than `threshold` is returned unchanged.
pub fn split(archive: &Path, threshold: u64) -> Result<Vec<PathBuf>> {
    if threshold == 0 {
        return Err(KelError::packaging("split threshold must be positive"));
    }
    let size = fs::metadata(archive).at_path(archive)?.len();
    if size <= threshold {
        return Ok(vec![archive.to_path_buf()]);
    }
    let count = size.div_ceil(threshold);
    if count > MAX_SHARDS {
        return Err(KelError::packaging(format!(
            "{} would need {count} shards (max {MAX_SHARDS}); raise split_threshold_gb",
            archive.display()
        )));
    }

    let mut reader =
        BufReader::with_capacity(COPY_BUFFER_SIZE, File::open(archive).at_path(archive)?);
    let mut parts = Vec::new();
    for index in 1..=count {
        let part = shard_path(archive, index as u32);
        let delivery = Delivery::begin(&part)?;
        {
            let file = File::create(delivery.tmp_path()).at_path(delivery.tmp_path())?;
            let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);
            io::copy(&mut (&mut reader).take(threshold), &mut writer).at_path(&part)?;
            writer.flush().at_path(&part)?;
        }
        parts.push(delivery.complete()?);
    }

    fs::remove_file(archive).at_path(archive)?;
    info!(archive = %archive.display(), shards = parts.len(), "Split archive");
    Ok(parts)
}

fn shard_path(archive: &Path, index: u32) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(format!(".{index:03}"));
    PathBuf::from(name)
}

/// Extract `archive` into `target_dir`, refusing entries that would land
/// outside it. Returns the number of files written.
pub fn unpack(archive: &Path, target_dir: &Path) -> Result<usize> {
    let file = File::open(archive).at_path(archive)?;
    unpack_reader(BufReader::new(file), target_dir)
        .map_err(|e| annotate(e, archive))
}

fn unpack_reader<R: Read>(reader: R, target_dir: &Path) -> Result<usize> {
    ensure_dir(target_dir)?;
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut count = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.into_owned();
        let kind = entry.header().entry_type();

        match kind {
            EntryType::Directory => {
                ensure_dir(&safe_join(target_dir, &name)?)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                let dest = safe_join(target_dir, &name)?;
                if let Some(parent) = dest.parent() {
                    ensure_dir(parent)?;
                }
                entry.unpack(&dest).at_path(&dest)?;
                count += 1;
            }
            EntryType::Symlink | EntryType::Link => {
                return Err(KelError::PathTraversal(format!(
                    "link entry '{}' not allowed",
                    name.display()
                )));
            }
            other => {
                warn!(entry = %name.display(), kind = ?other, "Skipping unsupported archive entry");
            }
        }
    }
    Ok(count)
}

fn annotate(e: KelError, archive: &Path) -> KelError {
    match e {
        KelError::Io(io) => KelError::io_at(archive, io),
        other => other,
    }
}

/// Shards `*.tar.gz.NNN` directly under `dir`, ordered by index.
pub fn find_shards(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut shards: Vec<(u32, PathBuf)> = list_files(dir, "*.tar.gz.[0-9][0-9][0-9]")?
        .into_iter()
        .filter_map(|path| {
            let index = shard_index(&path.file_name()?.to_string_lossy())?;
            Some((index, path))
        })
        .collect();
    shards.sort_by_key(|(index, _)| *index);
    Ok(shards.into_iter().map(|(_, path)| path).collect())
}

/// Extract the package found in `input_dir` into `target_dir`.
///
/// Shards are concatenated in index order into a temporary archive first;
/// otherwise exactly one `*.tar.gz` must be present.
pub fn merge_and_unpack(input_dir: &Path, target_dir: &Path) -> Result<usize> {
    let shards = find_shards(input_dir)?;
    if !shards.is_empty() {
        check_shard_sequence(&shards)?;
        ensure_dir(target_dir)?;
        let staging = target_dir.parent().unwrap_or(target_dir);
        let mut merged = tempfile::Builder::new()
            .prefix(".kel-merge-")
            .suffix(ARCHIVE_SUFFIX)
            .tempfile_in(staging)
            .at_path(staging)?;
        let merged_path = merged.path().to_path_buf();
        {
            let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, merged.as_file_mut());
            for shard in &shards {
                let mut reader = File::open(shard).at_path(shard)?;
                io::copy(&mut reader, &mut writer).at_path(shard)?;
            }
            writer.flush().at_path(&merged_path)?;
        }
        info!(shards = shards.len(), "Merged shards");
        // temp archive is removed when `merged` drops, success or not
        return unpack(&merged_path, target_dir);
    }

    let archives = list_files(input_dir, &format!("*{ARCHIVE_SUFFIX}"))?;
    match archives.as_slice() {
        [archive] => unpack(archive, target_dir),
        [] => Err(KelError::packaging(format!(
            "no package found in {}",
            input_dir.display()
        ))),
        _ => Err(KelError::packaging(format!(
            "{} archives found in {}, expected one",
            archives.len(),
            input_dir.display()
        ))),
    }
}

fn check_shard_sequence(shards: &[PathBuf]) -> Result<()> {
    for (expected, shard) in (1u32..).zip(shards) {
        let index = shard
            .file_name()
            .and_then(|n| shard_index(&n.to_string_lossy()));
        if index != Some(expected) {
            return Err(KelError::packaging(format!(
                "shard {expected:03} missing before {}",
                shard.display()
            )));
        }
    }
    Ok(())
}

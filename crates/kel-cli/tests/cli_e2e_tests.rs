//! End-to-end tests for the kel binary
//!
//! These tests run the real binary against a temporary configuration
//! directory and validate:
//! - Job listing
//! - Extract followed by load of the same batch
//! - Package verification
//! - SM3 checksums
//! - Error messages with hints

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Lay out conf/, a source tree and the job files for a file transfer
fn setup() -> TempDir {
    let root = TempDir::new().unwrap();
    let r = root.path().display();
    fs::create_dir_all(root.path().join("conf/jobs")).unwrap();
    fs::create_dir_all(root.path().join("source/reports")).unwrap();
    fs::write(root.path().join("source/reports/q1.csv"), "region,total\nnorth,10\n").unwrap();
    fs::write(root.path().join("source/readme.txt"), "quarterly reports\n").unwrap();

    fs::write(
        root.path().join("conf/global.yaml"),
        "security:\n  sm4_key: \"0123456789abcdef\"\n  enable_encryption: true\n",
    )
    .unwrap();
    fs::write(
        root.path().join("conf/jobs/docs.yaml"),
        format!(
            r#"
job:
  type: FILE_EXTRACT
  name: docs
  description: Quarterly reports
settings:
  work_dir: {r}/work
resources:
  extract_dir:
    extract_dir: {r}/source
    exchange_dir: {r}/exchange
tasks:
  - mode: FULL
"#
        ),
    )
    .unwrap();
    fs::write(
        root.path().join("conf/jobs/docs_in.yaml"),
        format!(
            r#"
job:
  type: FILE_LOAD
  name: docs_in
settings:
  work_dir: {r}/load-work
resources:
  load_dir:
    input_dir: {r}/exchange/docs
    target_dir: {r}/restored
"#
        ),
    )
    .unwrap();
    root
}

fn kel(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kel").unwrap();
    cmd.current_dir(root)
        .env_remove("KEL_CONF_DIR")
        .env_remove("KEL_POLL_INTERVAL_MS")
        .env("LOG_LEVEL", "error")
        .arg("--conf-dir")
        .arg(root.join("conf"));
    cmd
}

fn only_batch_dir(root: &Path) -> PathBuf {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root.join("exchange/docs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(dirs.len(), 1, "expected one batch, got {dirs:?}");
    dirs.remove(0)
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("kel")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("load"))
        .stdout(predicate::str::contains("checksum"));
}

#[test]
fn test_jobs_lists_types() {
    let root = setup();
    kel(root.path())
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("docs"))
        .stdout(predicate::str::contains("FILE_EXTRACT"))
        .stdout(predicate::str::contains("FILE_LOAD"))
        .stdout(predicate::str::contains("Quarterly reports"))
        .stdout(predicate::str::contains("Total jobs: 2"));
}

#[test]
fn test_extract_then_load_round_trip() {
    let root = setup();

    kel(root.path())
        .args(["extract", "docs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Extract 'docs' completed"))
        .stdout(predicate::str::contains(".tar.gz"));

    let batch_dir = only_batch_dir(root.path());
    let batch = batch_dir.file_name().unwrap().to_string_lossy().into_owned();

    kel(root.path())
        .arg("verify")
        .arg(&batch_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("package files match"));

    kel(root.path())
        .args(["load", "docs_in"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Load 'docs_in' completed"))
        .stdout(predicate::str::contains(batch.as_str()))
        .stdout(predicate::str::contains("2 files restored"));

    assert_eq!(
        fs::read_to_string(root.path().join("restored/reports/q1.csv")).unwrap(),
        "region,total\nnorth,10\n"
    );
    assert!(root.path().join("restored/readme.txt").is_file());
}

#[test]
fn test_verify_rejects_tampered_package() {
    let root = setup();
    kel(root.path()).args(["extract", "docs"]).assert().success();

    let batch_dir = only_batch_dir(root.path());
    let package = fs::read_dir(&batch_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.to_string_lossy().contains(".tar.gz"))
        .unwrap();
    let mut bytes = fs::read(&package).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&package, bytes).unwrap();

    kel(root.path())
        .arg("verify")
        .arg(&batch_dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Verification failed"));

    kel(root.path())
        .args(["load", "docs_in"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Verification failed"));
    assert!(!root.path().join("restored/readme.txt").exists());
}

#[test]
fn test_unknown_job_suggests_listing() {
    let root = setup();
    kel(root.path())
        .args(["extract", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Job 'nope' not found"))
        .stderr(predicate::str::contains("kel jobs"));
}

#[test]
fn test_wrong_kind_suggests_other_command() {
    let root = setup();
    kel(root.path())
        .args(["extract", "docs_in"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("kel load docs_in"));
}

#[test]
fn test_checksum_prints_sm3() {
    let root = TempDir::new().unwrap();
    let file = root.path().join("abc.txt");
    fs::write(&file, "abc").unwrap();

    kel(root.path())
        .arg("checksum")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "66c7f0f462eeedd9d1f2d46bdc10e4e24167c4875cf2f7a2297da02b8f4ba8e0",
        ));

    kel(root.path())
        .arg("checksum")
        .arg(root.path().join("missing.bin"))
        .assert()
        .failure();
}

#[test]
fn test_second_extract_publishes_new_batch() {
    let root = setup();
    kel(root.path()).args(["extract", "docs"]).assert().success();
    let first = only_batch_dir(root.path());
    let first_manifest = fs::read(first.join("manifest.json")).unwrap();

    fs::write(root.path().join("source/reports/q2.csv"), "region,total\nsouth,7\n").unwrap();
    kel(root.path()).args(["extract", "docs"]).assert().success();

    let mut batches: Vec<String> = fs::read_dir(root.path().join("exchange/docs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    batches.sort();
    assert_eq!(batches.len(), 2, "second extract must publish a new batch: {batches:?}");
    assert!(batches[0].ends_with("_001"));
    assert!(batches[1].ends_with("_002"));
    assert_eq!(fs::read(first.join("manifest.json")).unwrap(), first_manifest);

    kel(root.path())
        .args(["load", "docs_in"])
        .assert()
        .success()
        .stdout(predicate::str::contains(batches[1].as_str()))
        .stdout(predicate::str::contains("3 files restored"));
}

#[test]
fn test_jobs_tables_lists_configured_tables() {
    let root = setup();
    fs::write(
        root.path().join("conf/jobs/bss.yaml"),
        r#"
job: { type: TABLE_EXTRACT, name: bss }
tasks:
  - mode: FULL
    tables: [public.users, public.orders]
  - mode: INCREMENTAL
    queries:
      - { name: recent_orders, sql: "SELECT * FROM public.orders" }
"#,
    )
    .unwrap();

    kel(root.path())
        .args(["jobs", "tables", "bss"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exportable tables:"))
        .stdout(predicate::str::contains("public.users"))
        .stdout(predicate::str::contains("public.orders"))
        .stdout(predicate::str::contains("recent_orders"));

    kel(root.path())
        .args(["jobs", "tables", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Job 'nope' not found"));
}

#[test]
fn test_extract_rejects_unknown_table() {
    let root = setup();
    kel(root.path())
        .args(["extract", "docs", "--table", "public.missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("public.missing"));
    assert!(!root.path().join("exchange/docs").exists());
}

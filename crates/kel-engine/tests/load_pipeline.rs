//! End-to-end tests for the load pipeline
//!
//! Packages are produced by a real extract run first, so these tests also
//! cover the exchange format between the two sides.

mod helpers;

use helpers::{merged, noise, write_file, FakeSource, RecordingSink};
use kel_common::KelError;
use kel_engine::manifest::MANIFEST_FILE;
use kel_engine::plugin::{TableExtractMover, TableLoadMover};
use kel_engine::store::LogLevel;
use kel_engine::{InMemoryTaskStore, Orchestrator, TaskExecutionContext, TaskStatus, TaskStore};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const KEY: &str = "0123456789abcdef";

/// Publish three files for job `docs` and return the extract context.
fn extract_docs(root: &Path, security: &str) -> TaskExecutionContext {
    for (i, name) in ["a.bin", "nested/b.bin", "nested/deeper/c.bin"].iter().enumerate() {
        write_file(&root.join("source").join(name), &noise(12 * 1024, i as u64 + 7));
    }
    let orchestrator = Orchestrator::new(Arc::new(InMemoryTaskStore::new()));
    let config = merged(&format!(
        r#"
job: {{ type: FILE_EXTRACT, name: docs }}
settings:
  work_dir: {root}/work
  compression: {{ split_threshold_gb: 0.00001 }}
  security: {security}
resources:
  extract_dir: {{ extract_dir: {root}/source, exchange_dir: {root}/exchange }}
tasks:
  - {{ mode: FULL, files: {{ pattern: "*.bin" }} }}
"#,
        root = root.display()
    ));
    let mut ctx = orchestrator.create_context(config, None).unwrap();
    orchestrator.execute(&mut ctx).unwrap();
    ctx
}

fn docs_load_job(root: &Path, settings: &str) -> String {
    format!(
        r#"
job: {{ type: FILE_LOAD, name: docs_in }}
settings:
  work_dir: {root}/load-work
  {settings}
resources:
  load_dir: {{ input_dir: {root}/exchange/docs, target_dir: {root}/restored }}
"#,
        root = root.display()
    )
}

#[test]
fn test_encrypted_shards_restore_files() {
    let root = TempDir::new().unwrap();
    let extracted = extract_docs(
        root.path(),
        &format!("{{ enable_encryption: true, sm4_key: \"{KEY}\" }}"),
    );
    assert!(extracted.attributes.published.len() > 1);

    let store = Arc::new(InMemoryTaskStore::new());
    let orchestrator = Orchestrator::new(store.clone());
    let settings = format!("security: {{ enable_encryption: true, sm4_key: \"{KEY}\" }}");
    let config = merged(&docs_load_job(root.path(), &settings));
    let mut ctx = orchestrator.create_context(config, None).unwrap();
    assert_eq!(ctx.batch_number(), extracted.batch_number());

    orchestrator.execute(&mut ctx).unwrap();

    for name in ["a.bin", "nested/b.bin", "nested/deeper/c.bin"] {
        assert_eq!(
            fs::read(root.path().join("restored").join(name)).unwrap(),
            fs::read(root.path().join("source").join(name)).unwrap(),
            "{name} differs after round trip"
        );
    }
    assert_eq!(ctx.attributes.file_mappings.len(), 3);

    let job_work = root.path().join("load-work/docs_in");
    let leftovers: Vec<_> = fs::read_dir(&job_work)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, [ctx.batch_number().to_string()]);

    let record = store.find_by_id(ctx.task_id()).unwrap();
    assert_eq!(record.status, TaskStatus::Success);
    assert_eq!(record.progress, 100);
    assert_eq!(record.statistics.unwrap()["total_files"], 3);
}

#[test]
fn test_wrong_key_fails_load() {
    let root = TempDir::new().unwrap();
    extract_docs(
        root.path(),
        &format!("{{ enable_encryption: true, sm4_key: \"{KEY}\" }}"),
    );

    let store = Arc::new(InMemoryTaskStore::new());
    let orchestrator = Orchestrator::new(store.clone());
    let settings = "security: { enable_encryption: true, sm4_key: \"fedcba9876543210\" }";
    let mut ctx = orchestrator
        .create_context(merged(&docs_load_job(root.path(), settings)), None)
        .unwrap();

    assert!(orchestrator.execute(&mut ctx).is_err());
    assert_eq!(store.find_by_id(ctx.task_id()).unwrap().status, TaskStatus::Failed);
    assert!(!root.path().join("restored/a.bin").exists());
}

#[test]
fn test_tampered_shard_is_rejected_without_retry() {
    let root = TempDir::new().unwrap();
    let extracted = extract_docs(root.path(), "{ enable_encryption: false }");
    let shard = &extracted.attributes.published[1];
    let mut bytes = fs::read(shard).unwrap();
    bytes[100] ^= 0xff;
    fs::write(shard, bytes).unwrap();

    let store = Arc::new(InMemoryTaskStore::new());
    let orchestrator = Orchestrator::new(store.clone());
    let settings = "runtime: { max_retries: 3, retry_interval_sec: 3600 }";
    let mut ctx = orchestrator
        .create_context(merged(&docs_load_job(root.path(), settings)), None)
        .unwrap();

    let err = orchestrator.execute(&mut ctx).unwrap_err();

    assert!(matches!(err, KelError::ManifestInvalid(_)), "{err}");
    let record = store.find_by_id(ctx.task_id()).unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(!record.execution_log.iter().any(|e| e.stage == "RETRY"));
    assert!(!root.path().join("restored").exists());
}

#[test]
fn test_load_without_sidecar_still_validates_contents() {
    let root = TempDir::new().unwrap();
    let extracted = extract_docs(root.path(), "{ enable_encryption: false }");
    fs::remove_file(extracted.exchange_dir().join(MANIFEST_FILE)).unwrap();

    let store = Arc::new(InMemoryTaskStore::new());
    let orchestrator = Orchestrator::new(store.clone());
    let mut ctx = orchestrator
        .create_context(merged(&docs_load_job(root.path(), "")), None)
        .unwrap();

    orchestrator.execute(&mut ctx).unwrap();

    let record = store.find_by_id(ctx.task_id()).unwrap();
    assert_eq!(record.status, TaskStatus::Success);
    assert!(record
        .execution_log
        .iter()
        .any(|e| e.log_level == LogLevel::Warn && e.stage == "INIT"));
    assert!(root.path().join("restored/nested/deeper/c.bin").is_file());
}

#[test]
fn test_missing_batch_directory_fails() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("exchange/docs")).unwrap();
    let store = Arc::new(InMemoryTaskStore::new());
    let orchestrator = Orchestrator::new(store.clone());
    let mut ctx = orchestrator
        .create_context(merged(&docs_load_job(root.path(), "")), Some("20990101_001"))
        .unwrap();

    let err = orchestrator.execute(&mut ctx).unwrap_err();

    assert!(matches!(err, KelError::IoAt { .. }), "{err}");
    assert_eq!(store.find_by_id(ctx.task_id()).unwrap().status, TaskStatus::Failed);
}

#[test]
fn test_tables_round_trip_into_sink() {
    let root = TempDir::new().unwrap();
    let extract = Orchestrator::builder(Arc::new(InMemoryTaskStore::new()))
        .extract_mover(TableExtractMover::new(FakeSource::new(5)))
        .build();
    let extract_config = merged(&format!(
        r#"
job: {{ type: TABLE_EXTRACT, name: bss }}
settings: {{ work_dir: {root}/work, runtime: {{ table_concurrency: 2 }} }}
resources:
  extract_database: {{ host: db, port: 54321, name: bss, user: reader }}
  extract_dir: {{ exchange_dir: {root}/exchange }}
tasks:
  - {{ mode: FULL, tables: [public.users, public.orders] }}
"#,
        root = root.path().display()
    ));
    let mut extracted = extract.create_context(extract_config, None).unwrap();
    extract.execute(&mut extracted).unwrap();

    let sink = RecordingSink::default();
    let log = sink.log.clone();
    let store = Arc::new(InMemoryTaskStore::new());
    let load = Orchestrator::builder(store.clone())
        .load_mover(TableLoadMover::new(sink))
        .build();
    let load_config = merged(&format!(
        r#"
job: {{ type: TABLE_LOAD, name: bss_in }}
settings: {{ work_dir: {root}/load-work }}
resources:
  target_database: {{ host: target, port: 54321, name: ods, user: writer }}
  load_dir: {{ input_dir: {root}/exchange/bss }}
tasks:
  - mode: TRUNCATE_LOAD
    transaction: true
    mappings: {{ public.users: ods.users, public.orders: ods.orders }}
    merge_sql: "CALL ods.refresh()"
"#,
        root = root.path().display()
    ));
    let mut ctx = load.create_context(load_config, None).unwrap();

    load.execute(&mut ctx).unwrap();

    assert_eq!(
        *log.lock(),
        [
            "BEGIN",
            "TRUNCATE ods.orders",
            "COPY ods.orders 5",
            "TRUNCATE ods.users",
            "COPY ods.users 5",
            "EXEC CALL ods.refresh()",
            "COMMIT",
        ]
    );
    assert_eq!(ctx.attributes.loaded_tables.get("ods.users"), Some(&5));
    let stats = store.find_by_id(ctx.task_id()).unwrap().statistics.unwrap();
    assert_eq!(stats["total_rows"], 10);
    assert_eq!(stats["total_tables"], 2);
}

/// `2^-15` GB, i.e. 32 KiB shards
const SHARD_32K_GB: &str = "0.000030517578125";

/// Publish one incompressible file of `len` bytes, unencrypted, in 32 KiB shards.
fn extract_plain(root: &Path, len: usize) -> TaskExecutionContext {
    write_file(&root.join("source/blob.bin"), &noise(len, 42));
    let orchestrator = Orchestrator::new(Arc::new(InMemoryTaskStore::new()));
    let config = merged(&format!(
        r#"
job: {{ type: FILE_EXTRACT, name: docs }}
settings:
  work_dir: {root}/work
  compression: {{ split_threshold_gb: {SHARD_32K_GB} }}
resources:
  extract_dir: {{ extract_dir: {root}/source, exchange_dir: {root}/exchange }}
tasks:
  - {{ mode: FULL }}
"#,
        root = root.display()
    ));
    let mut ctx = orchestrator.create_context(config, None).unwrap();
    orchestrator.execute(&mut ctx).unwrap();
    ctx
}

#[test]
fn test_plain_package_in_two_shards_restores_file() {
    let root = TempDir::new().unwrap();
    let extracted = extract_plain(root.path(), 40 * 1024);
    let names: Vec<String> = extracted
        .attributes
        .published
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    let batch = extracted.batch_number();
    assert_eq!(
        names,
        [format!("docs_{batch}.tar.gz.001"), format!("docs_{batch}.tar.gz.002")]
    );

    let store = Arc::new(InMemoryTaskStore::new());
    let orchestrator = Orchestrator::new(store.clone());
    let mut ctx = orchestrator
        .create_context(merged(&docs_load_job(root.path(), "")), None)
        .unwrap();

    orchestrator.execute(&mut ctx).unwrap();

    assert_eq!(
        fs::read(root.path().join("restored/blob.bin")).unwrap(),
        fs::read(root.path().join("source/blob.bin")).unwrap()
    );
    let record = store.find_by_id(ctx.task_id()).unwrap();
    assert_eq!(record.status, TaskStatus::Success);
    let stats = record.statistics.unwrap();
    let decrypt = stats["stages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["stage_name"] == "DECRYPT")
        .unwrap();
    assert_eq!(decrypt["status"], "SKIPPED");
}

#[test]
fn test_shard_gap_is_rejected() {
    let root = TempDir::new().unwrap();
    let extracted = extract_plain(root.path(), 80 * 1024);
    assert_eq!(extracted.attributes.published.len(), 3);
    let exchange = extracted.exchange_dir();
    fs::remove_file(&extracted.attributes.published[1]).unwrap();

    // the sidecar catches the missing shard first
    let store = Arc::new(InMemoryTaskStore::new());
    let orchestrator = Orchestrator::new(store.clone());
    let mut ctx = orchestrator
        .create_context(merged(&docs_load_job(root.path(), "")), None)
        .unwrap();
    let err = orchestrator.execute(&mut ctx).unwrap_err();
    assert!(matches!(err, KelError::ManifestInvalid(_)), "{err}");

    // without it, merging refuses .001 followed by .003
    fs::remove_file(exchange.join(MANIFEST_FILE)).unwrap();
    let mut ctx = orchestrator
        .create_context(merged(&docs_load_job(root.path(), "")), None)
        .unwrap();
    let err = orchestrator.execute(&mut ctx).unwrap_err();
    assert!(matches!(err, KelError::Packaging(_)), "{err}");
    assert!(err.to_string().contains("shard 002 missing"), "{err}");
    assert_eq!(store.find_by_id(ctx.task_id()).unwrap().status, TaskStatus::Failed);
    assert!(!root.path().join("restored/blob.bin").exists());
}

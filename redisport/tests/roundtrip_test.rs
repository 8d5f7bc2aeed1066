//! Export -> import round-trip tests against the in-memory store.
//!
//! Verifies:
//! - replaying an export into an empty store reproduces the dataset
//! - pattern filtering and scan-mode independence
//! - per-record error counting on import
//! - relative TTL re-establishment

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use redisport::{
    ExportOptions, ExportSession, ImportSession, KeyType, MemoryStore, OperationState, ScanMode,
    StatusStore, Store, StreamEntry,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn status_in(dir: &TempDir, name: &str) -> Arc<StatusStore> {
    Arc::new(StatusStore::open(dir.path().join(name)))
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.set_string(b"str:plain", b"hello world");
    store.set_string(b"str:binary", &[0u8, 1, 2, 253, 254, 255]);
    store.set_string(b"str:quoted", b"say \"hi\" \\ back");
    store.set_hash(
        b"hash:user",
        &[
            (b"name".as_slice(), b"Alice".as_slice()),
            (b"city".as_slice(), b"Oslo".as_slice()),
        ],
    );
    store.set_list(b"list:queue", &[b"first", b"second", b"third"]);
    store.set_set(b"set:tags", &[b"red", b"green", b"blue"]);
    store.set_sorted_set(
        b"zset:board",
        &[(b"alice".as_slice(), 1.0), (b"bob".as_slice(), 2.5)],
    );
    store.set_stream(
        b"stream:events",
        vec![
            StreamEntry {
                id: "1-1".to_string(),
                fields: vec![(b"type".to_vec(), b"login".to_vec())],
            },
            StreamEntry {
                id: "2-1".to_string(),
                fields: vec![
                    (b"type".to_vec(), b"logout".to_vec()),
                    (b"user".to_vec(), b"alice".to_vec()),
                ],
            },
        ],
    );
    store
}

async fn export_to(
    store: Arc<MemoryStore>,
    dir: &TempDir,
    sub: &str,
    pattern: &str,
    mode: ScanMode,
) -> PathBuf {
    let status = status_in(dir, &format!("{sub}-state.json"));
    let session = ExportSession::new(store, status);
    let outcome = session
        .run(ExportOptions {
            pattern: pattern.to_string(),
            folder: dir.path().join(sub),
            mode,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(outcome.state, OperationState::Completed);
    outcome.file
}

async fn import_into(store: Arc<MemoryStore>, dir: &TempDir, sub: &str, file: &PathBuf) {
    let status = status_in(dir, &format!("{sub}-import-state.json"));
    let session = ImportSession::new(store, status);
    let summary = session.run(file).await.unwrap();
    assert_eq!(summary.errors, 0, "unexpected import errors");
}

/// Compare two stores key by key over the trait surface.
async fn assert_stores_equal(left: &dyn Store, right: &dyn Store) {
    let mut left_keys = left.list_keys("*").await.unwrap();
    let mut right_keys = right.list_keys("*").await.unwrap();
    left_keys.sort();
    right_keys.sort();
    assert_eq!(left_keys, right_keys, "key sets differ");

    for key in &left_keys {
        let key_type = left.key_type(key).await.unwrap();
        assert_eq!(key_type, right.key_type(key).await.unwrap());
        match key_type {
            KeyType::String => {
                assert_eq!(
                    left.get_string(key).await.unwrap(),
                    right.get_string(key).await.unwrap()
                );
            }
            KeyType::Hash => {
                let mut a = left.hash_entries(key).await.unwrap();
                let mut b = right.hash_entries(key).await.unwrap();
                a.sort();
                b.sort();
                assert_eq!(a, b);
            }
            KeyType::List => {
                assert_eq!(
                    left.list_range(key).await.unwrap(),
                    right.list_range(key).await.unwrap()
                );
            }
            KeyType::Set => {
                let mut a = left.set_members(key).await.unwrap();
                let mut b = right.set_members(key).await.unwrap();
                a.sort();
                b.sort();
                assert_eq!(a, b);
            }
            KeyType::SortedSet => {
                assert_eq!(
                    left.sorted_set_entries(key).await.unwrap(),
                    right.sorted_set_entries(key).await.unwrap()
                );
            }
            KeyType::Stream => {
                assert_eq!(
                    left.stream_entries(key).await.unwrap(),
                    right.stream_entries(key).await.unwrap()
                );
            }
            KeyType::Unknown(tag) => panic!("unexpected type {tag}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn export_then_import_reproduces_dataset() {
    let dir = TempDir::new().unwrap();
    let source = seeded_store();

    let file = export_to(source.clone(), &dir, "a", "*", ScanMode::Incremental).await;
    assert!(file
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("redis-export-"));

    let target = MemoryStore::new();
    import_into(target.clone(), &dir, "a", &file).await;

    assert_stores_equal(&*source, &*target).await;
}

#[tokio::test]
async fn pattern_limits_export_to_matching_keys() {
    let dir = TempDir::new().unwrap();
    let source = seeded_store();

    let file = export_to(source.clone(), &dir, "p", "str:*", ScanMode::Incremental).await;

    let target = MemoryStore::new();
    import_into(target.clone(), &dir, "p", &file).await;

    assert_eq!(target.key_count(), 3);
    assert!(target.get_string(b"str:plain").await.unwrap().is_some());
    assert_eq!(
        target.key_type(b"hash:user").await.unwrap(),
        KeyType::Unknown("none".to_string())
    );
}

#[tokio::test]
async fn scan_modes_import_to_identical_states() {
    let dir = TempDir::new().unwrap();
    let source = seeded_store();

    let incremental = export_to(source.clone(), &dir, "inc", "*", ScanMode::Incremental).await;
    let full = export_to(source.clone(), &dir, "full", "*", ScanMode::Full).await;

    let from_incremental = MemoryStore::new();
    import_into(from_incremental.clone(), &dir, "inc", &incremental).await;
    let from_full = MemoryStore::new();
    import_into(from_full.clone(), &dir, "full", &full).await;

    assert_stores_equal(&*from_incremental, &*from_full).await;
}

#[tokio::test]
async fn binary_values_roundtrip_byte_for_byte() {
    let dir = TempDir::new().unwrap();
    let source = MemoryStore::new();
    let payload: Vec<u8> = (0..=255u8).collect();
    source.set_string(b"blob", &payload);
    source.set_hash(b"h", &[(&[0u8, 255][..], &payload[..])]);

    let file = export_to(source.clone(), &dir, "bin", "*", ScanMode::Incremental).await;
    let target = MemoryStore::new();
    import_into(target.clone(), &dir, "bin", &file).await;

    assert_eq!(target.get_string(b"blob").await.unwrap().unwrap(), payload);
    assert_eq!(
        target.hash_entries(b"h").await.unwrap(),
        vec![(vec![0u8, 255], payload)]
    );
}

#[tokio::test]
async fn one_malformed_line_does_not_abort_import() {
    let dir = TempDir::new().unwrap();
    let mut lines: Vec<String> = (0..100)
        .map(|i| format!("SET \"key:{i}\" \"value\""))
        .collect();
    lines.insert(50, "SET \"broken".to_string());
    let file = dir.path().join("import.txt");
    std::fs::write(&file, lines.join("\n")).unwrap();

    let target = MemoryStore::new();
    let session = ImportSession::new(target.clone(), status_in(&dir, "state.json"));
    let summary = session.run(&file).await.unwrap();

    assert_eq!(summary.imported, 100);
    assert_eq!(summary.errors, 1);
    assert_eq!(target.key_count(), 100);
}

#[tokio::test]
async fn comments_and_blank_lines_are_skipped() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("import.txt");
    std::fs::write(
        &file,
        "# Unsupported type ReJSON-RL for key \"doc\"\n\nSET \"k\" \"v\"\n",
    )
    .unwrap();

    let target = MemoryStore::new();
    let session = ImportSession::new(target.clone(), status_in(&dir, "state.json"));
    let summary = session.run(&file).await.unwrap();

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.errors, 0);
}

#[tokio::test]
async fn ttl_is_skipped_when_value_command_failed() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("import.txt");
    std::fs::write(&file, "RPUSH \"k\" \"a\"\nPEXPIRE \"k\" 5000\n").unwrap();

    // Existing string key makes the RPUSH a type mismatch.
    let target = MemoryStore::new();
    target.set_string(b"k", b"v");

    let session = ImportSession::new(target.clone(), status_in(&dir, "state.json"));
    let summary = session.run(&file).await.unwrap();

    assert_eq!(summary.imported, 0);
    assert_eq!(summary.errors, 2);
    assert!(target.ttl_remaining(b"k").await.unwrap().is_none());
    assert_eq!(target.get_string(b"k").await.unwrap().unwrap(), b"v");
}

#[tokio::test]
async fn hash_and_ttl_scenario() {
    // Dataset {user:1 -> hash{name: Alice}, user:2 -> string with 10s TTL},
    // exported with pattern user:* and re-imported into a fresh store.
    let dir = TempDir::new().unwrap();
    let source = MemoryStore::new();
    source.set_hash(b"user:1", &[(b"name".as_slice(), b"Alice".as_slice())]);
    source.set_string_ttl(b"user:2", b"v", Duration::from_secs(10));
    source.set_string(b"other", b"ignored");

    let file = export_to(source.clone(), &dir, "ttl", "user:*", ScanMode::Incremental).await;

    let target = MemoryStore::new();
    import_into(target.clone(), &dir, "ttl", &file).await;

    assert_eq!(target.key_count(), 2);
    let hash = target.hash_entries(b"user:1").await.unwrap();
    assert_eq!(hash, vec![(b"name".to_vec(), b"Alice".to_vec())]);

    let ttl = target.ttl_remaining(b"user:2").await.unwrap().unwrap();
    assert!(ttl > Duration::ZERO && ttl <= Duration::from_secs(10));
}

//! Integration tests for the public `Db` API.
//!
//! These exercise the full stack (WAL → memtable → SSTs → compaction →
//! transactions) through `noctisdb::{Db, StoreConfig, IsolationLevel}`
//! only; no internal modules are referenced.

use std::cmp::Ordering;

use noctisdb::db::DbIterator;
use noctisdb::iterators::StorageIterator;
use noctisdb::{Db, IsolationLevel, StoreConfig};
use tempfile::TempDir;

/// Limits small enough that flushes and compactions happen in-test.
fn small_config() -> StoreConfig {
    StoreConfig {
        per_mem_limit: 4 * 1024,
        total_mem_limit: 16 * 1024,
        block_size: 1024,
        level_ratio: 4,
        bloom_expected_entries: 4096,
        ..StoreConfig::default()
    }
}

/// Everything stays in memory until an explicit flush.
fn roomy_config() -> StoreConfig {
    StoreConfig {
        per_mem_limit: 1 << 20,
        total_mem_limit: 64 << 20,
        ..StoreConfig::default()
    }
}

fn drain(mut iter: DbIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    while iter.is_valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    out
}

// ================================================================================================
// Scenario: basic get / put / remove
// ================================================================================================

#[test]
fn test_basic_get_put_remove() {
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), roomy_config()).unwrap();

    db.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
    assert_eq!(db.get(b"k").unwrap().unwrap(), b"v1");

    db.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
    assert_eq!(db.get(b"k").unwrap().unwrap(), b"v2");

    db.remove(b"k".to_vec()).unwrap();
    assert!(db.get(b"k").unwrap().is_none());

    assert!(db.get(b"absent").unwrap().is_none());
}

// ================================================================================================
// Scenario: flush & reopen persistence
// ================================================================================================

#[test]
fn test_flush_and_reopen_persistence() {
    let tmp = TempDir::new().unwrap();
    let count = 2000u32;
    {
        let db = Db::open(tmp.path(), small_config()).unwrap();

        // Batched writes keep the WAL fsync count reasonable.
        for chunk_start in (0..count).step_by(100) {
            let entries: Vec<_> = (chunk_start..chunk_start + 100)
                .map(|i| {
                    (
                        format!("key{i:05}").into_bytes(),
                        format!("value{i}").into_bytes(),
                    )
                })
                .collect();
            db.put_batch(entries).unwrap();
        }

        // Delete every 10th key.
        let doomed: Vec<_> = (0..count)
            .step_by(10)
            .map(|i| format!("key{i:05}").into_bytes())
            .collect();
        db.remove_batch(doomed).unwrap();

        db.close().unwrap();
    }

    let db = Db::open(tmp.path(), small_config()).unwrap();
    for i in 0..count {
        let got = db.get(format!("key{i:05}").as_bytes()).unwrap();
        if i % 10 == 0 {
            assert!(got.is_none(), "key{i:05} should be deleted");
        } else {
            assert_eq!(got.unwrap(), format!("value{i}").into_bytes(), "key{i:05}");
        }
    }
}

// ================================================================================================
// Scenario: range scan with a flush midway
// ================================================================================================

#[test]
fn test_range_scan_with_flush_midway() {
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), small_config()).unwrap();

    for i in 0..100u32 {
        db.put(
            format!("key{i:02}").into_bytes(),
            format!("value{i:02}").into_bytes(),
        )
        .unwrap();
        if i == 50 {
            db.flush().unwrap();
        }
    }

    let iter = db
        .iter_predicate(|key: &[u8]| {
            if key < b"key20".as_slice() {
                Ordering::Less
            } else if key > b"key60".as_slice() {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        })
        .unwrap();

    let got = drain(iter);
    assert_eq!(got.len(), 41);
    for (offset, (key, value)) in got.iter().enumerate() {
        let i = 20 + offset;
        assert_eq!(key, &format!("key{i:02}").into_bytes());
        assert_eq!(value, &format!("value{i:02}").into_bytes());
    }
}

// ================================================================================================
// Scenario: transactional isolation at RepeatableRead
// ================================================================================================

#[test]
fn test_repeatable_read_isolation_and_conflict() {
    let tmp = TempDir::new().unwrap();
    let db = Db::open(tmp.path(), roomy_config()).unwrap();

    let mut tx1 = db
        .begin_transaction(IsolationLevel::RepeatableRead)
        .unwrap();
    assert!(tx1.get(b"k").unwrap().is_none());

    let mut tx2 = db
        .begin_transaction(IsolationLevel::RepeatableRead)
        .unwrap();
    tx2.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
    assert!(tx2.commit().unwrap());

    // tx1's snapshot predates tx2's commit.
    assert!(tx1.get(b"k").unwrap().is_none());

    tx1.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
    assert!(!tx1.commit().unwrap(), "conflicting commit must fail");

    assert_eq!(db.get(b"k").unwrap().unwrap(), b"v2");
}

// ================================================================================================
// Scenario: compaction correctness under sustained writes
// ================================================================================================

#[test]
fn test_compaction_preserves_live_keys() {
    let tmp = TempDir::new().unwrap();
    let config = small_config();
    let ratio = config.level_ratio;
    let db = Db::open(tmp.path(), config).unwrap();

    let count = 1500u32;
    for chunk_start in (0..count).step_by(100) {
        let entries: Vec<_> = (chunk_start..chunk_start + 100)
            .map(|i| {
                (
                    format!("key{i:05}").into_bytes(),
                    format!("value{i}").into_bytes(),
                )
            })
            .collect();
        db.put_batch(entries).unwrap();
    }
    db.flush_all().unwrap();

    let stats = db.stats().unwrap();
    assert!(
        stats.level_sst_counts.len() > 1,
        "writes never reached a deeper level"
    );
    for (level, count) in stats.level_sst_counts.iter().enumerate() {
        assert!(
            *count <= ratio,
            "level {level} holds {count} tables right after compaction"
        );
    }

    for i in 0..count {
        assert_eq!(
            db.get(format!("key{i:05}").as_bytes()).unwrap().unwrap(),
            format!("value{i}").into_bytes(),
            "key{i:05} lost in compaction"
        );
    }
}

// ================================================================================================
// Cross-cutting: deletes shadow flushed values through scans and reopen
// ================================================================================================

#[test]
fn test_tombstones_across_flush_scan_and_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let db = Db::open(tmp.path(), roomy_config()).unwrap();
        db.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        db.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        db.flush_all().unwrap();

        db.remove(b"a".to_vec()).unwrap();
        assert_eq!(drain(db.iter().unwrap()), vec![(b"b".to_vec(), b"2".to_vec())]);
        db.close().unwrap();
    }

    let db = Db::open(tmp.path(), roomy_config()).unwrap();
    assert!(db.get(b"a").unwrap().is_none());
    assert_eq!(db.get(b"b").unwrap().unwrap(), b"2");
    assert_eq!(drain(db.iter().unwrap()), vec![(b"b".to_vec(), b"2".to_vec())]);
}

// ================================================================================================
// Cross-cutting: concurrent writers through one shared handle
// ================================================================================================

#[test]
fn test_concurrent_writers() {
    use std::sync::Arc;
    use std::thread;

    let tmp = TempDir::new().unwrap();
    let db = Arc::new(Db::open(tmp.path(), roomy_config()).unwrap());

    let mut handles = Vec::new();
    for worker in 0..4u32 {
        let db = Arc::clone(&db);
        handles.push(thread::spawn(move || {
            for i in 0..50u32 {
                db.put(
                    format!("w{worker}-key{i:03}").into_bytes(),
                    format!("w{worker}-value{i}").into_bytes(),
                )
                .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for worker in 0..4u32 {
        for i in 0..50u32 {
            assert_eq!(
                db.get(format!("w{worker}-key{i:03}").as_bytes())
                    .unwrap()
                    .unwrap(),
                format!("w{worker}-value{i}").into_bytes()
            );
        }
    }
}

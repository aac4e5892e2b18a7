//! # NoctisDB
//!
//! An embeddable, persistent, **transactional** key-value storage engine
//! built on a **Log-Structured Merge Tree (LSM-tree)** architecture with
//! MVCC-style version visibility.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                        Db                              │
//! │  ┌───────────┐   ┌──────────────┐   ┌──────────────┐   │
//! │  │  Active   │   │   Frozen     │   │  SST levels  │   │
//! │  │ skip list │──►│  skip lists  │──►│  L0 ──► Ln   │   │
//! │  └───────────┘   └──────────────┘   └──────────────┘   │
//! │        ▲   freeze          flush          compact      │
//! │        │                                               │
//! │  ┌───────────────┐      ┌──────────────────────────┐   │
//! │  │  TxManager    │      │  WAL (wal.<seq> batches) │   │
//! │  │  + watermarks │◄────►│  replayed on recovery    │   │
//! │  └───────────────┘      └──────────────────────────┘   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | Public facade — open, read, write, scan, transactions |
//! | [`engine`] | LSM core — memtable, SST levels, flush, compaction |
//! | [`tx`] | Transactions — isolation levels, conflict checks, watermarks |
//! | [`memtable`] | Active + frozen skip-list write pipeline |
//! | [`skiplist`] | Versioned ordered map keyed by `(key, txn id)` |
//! | [`sstable`] | Immutable on-disk tables — blocks, index, bloom filter |
//! | [`block`] | The unit of SST encoding, caching, and search |
//! | [`cache`] | Shared LRU-K block cache |
//! | [`iterators`] | Merge machinery — heap, two-way, concat cursors |
//! | [`wal`] | Segmented write-ahead log with group-by-transaction replay |
//! | [`encoding`] | Deterministic little-endian wire primitives |
//! | [`fileio`] | Atomically-created, mmap-backed random-read files |
//!
//! ## Key features
//!
//! - **Write-ahead logging** — every commit is fsynced as one record batch
//!   before it becomes visible, guaranteeing crash recovery.
//! - **MVCC visibility** — each entry carries the transaction id that wrote
//!   it; readers at snapshot isolation only see ids at or below their own.
//! - **Tombstone deletes** — an empty value marks deletion; tombstones are
//!   preserved through every compaction level.
//! - **Bloom-filtered lookups** — each SST carries a bloom filter for fast
//!   negative point reads.
//! - **Block-level CRC32 integrity** — data blocks, the block index, and the
//!   bloom section are all checksummed.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use noctisdb::{Db, IsolationLevel, StoreConfig};
//!
//! let db = Db::open("/tmp/my_db", StoreConfig::default()).unwrap();
//!
//! db.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! let mut tx = db.begin_transaction(IsolationLevel::RepeatableRead).unwrap();
//! tx.put(b"k".to_vec(), b"v".to_vec()).unwrap();
//! assert!(tx.commit().unwrap());
//!
//! db.close().unwrap();
//! ```

pub mod block;
pub mod cache;
pub mod config;
pub mod db;
pub mod encoding;
pub mod engine;
pub mod fileio;
pub mod iterators;
pub mod memtable;
pub mod skiplist;
pub mod sstable;
pub mod tx;
pub mod wal;

pub use config::StoreConfig;
pub use db::{Db, DbError};
pub use tx::IsolationLevel;

//! # Db Module
//!
//! The public facade: lifecycle, auto-committed single operations, batch
//! variants, transactions, and ordered scans, composed from the engine,
//! the WAL, and the transaction manager.
//!
//! ## Auto-commit writes
//!
//! `put`/`remove` (and their batch forms) behave as one-statement
//! transactions: each allocates a fresh txn id and appends a
//! `[Begin, ops…, Commit]` WAL batch **before** touching the engine, so a
//! plain write is exactly as durable and recoverable as a committed
//! transaction.
//!
//! ## Recovery
//!
//! `open` replays the WAL: every committed transaction beyond the flushed
//! watermark is re-applied to the engine under its original txn id, the
//! id allocator is re-seated above everything observed, old segments are
//! deleted, and a fresh segment is started.
//!
//! ## Scans
//!
//! `iter`, `iter_prefix`, and `iter_predicate` return a merged,
//! tombstone-filtered cursor over a snapshot taken at construction.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, StoreConfig};
use crate::engine::{Engine, EngineError, EngineStats, LsmIterator};
use crate::iterators::{IterError, TombstoneFilter};
use crate::sstable::iterator::KeyPredicate;
use crate::tx::{IsolationLevel, TxContext, TxError, TxManager};
use crate::wal::{Wal, WalError, WalRecord};

/// Errors surfaced through the public API.
#[derive(Debug, Error)]
pub enum DbError {
    /// Rejected configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Storage-core failure.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Transaction-layer failure.
    #[error("transaction error: {0}")]
    Tx(#[from] TxError),

    /// Write-ahead-log failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Scan-cursor failure.
    #[error("iterator error: {0}")]
    Iter(#[from] IterError),

    /// Operation on a closed handle.
    #[error("store is closed")]
    Closed,
}

/// User-facing scan cursor: the full merge with tombstones hidden.
pub type DbIterator = TombstoneFilter<LsmIterator>;

/// An open store.
///
/// Every method takes `&self`, so one handle can be shared across
/// threads behind an `Arc`.
pub struct Db {
    engine: Arc<Engine>,
    wal: Arc<Wal>,
    txs: Arc<TxManager>,
    closed: AtomicBool,
}

impl Db {
    /// Opens (or creates) a store rooted at `dir`, running WAL recovery.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, DbError> {
        config.validate()?;
        let dir = dir.as_ref();
        let wal_segment_size = config.wal_segment_size;

        let engine = Arc::new(Engine::open(dir, config)?);
        let txs = Arc::new(TxManager::open(dir)?);

        // Replay committed transactions that never reached an SST.
        let streams = Wal::recover(dir, txs.max_flushed())?;
        let mut max_replayed = 0;
        for (&txn_id, records) in &streams {
            for record in records {
                let flushed = match record {
                    WalRecord::Put { key, value, .. } => {
                        engine.put(key.clone(), value.clone(), txn_id)?
                    }
                    WalRecord::Delete { key, .. } => engine.remove(key.clone(), txn_id)?,
                    _ => 0,
                };
                txs.update_max_flushed(flushed)?;
            }
            max_replayed = max_replayed.max(txn_id);
        }
        if !streams.is_empty() {
            info!(
                transactions = streams.len(),
                max_replayed, "WAL recovery replayed"
            );
        }

        // Re-seat the id allocator above everything ever observed, then
        // retire the consumed segments.
        txs.ensure_next_txn_id(max_replayed + 1);
        txs.ensure_next_txn_id(engine.max_sst_txn_id()? + 1);
        Wal::remove_segments(dir)?;
        let wal = Arc::new(Wal::open(dir, wal_segment_size)?);
        txs.persist()?;

        Ok(Self {
            engine,
            wal,
            txs,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            Err(DbError::Closed)
        } else {
            Ok(())
        }
    }

    /// Entry bounds are enforced before anything reaches the WAL, so a
    /// rejected write leaves no trace to replay.
    fn validate_entry(key: &[u8], value: &[u8]) -> Result<(), DbError> {
        crate::engine::utils::validate_entry(key, value)
            .map_err(|msg| DbError::Engine(EngineError::InvalidEntry(msg)))
    }

    // --------------------------------------------------------------------------------------------
    // Point operations
    // --------------------------------------------------------------------------------------------

    /// Reads the newest committed value of `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        self.ensure_open()?;
        Ok(self.engine.get(key, 0)?)
    }

    /// Batch read, positionally matching the input keys.
    pub fn get_batch(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, DbError> {
        self.ensure_open()?;
        Ok(self.engine.get_batch(keys, 0)?)
    }

    /// Writes `key → value` as an auto-committed one-statement
    /// transaction.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), DbError> {
        self.ensure_open()?;
        Self::validate_entry(&key, &value)?;
        let txn_id = self.txs.fresh_txn_id();
        self.wal.append_batch(&[
            WalRecord::Begin(txn_id),
            WalRecord::Put {
                txn_id,
                key: key.clone(),
                value: value.clone(),
            },
            WalRecord::Commit(txn_id),
        ])?;
        let flushed = self.engine.put(key, value, txn_id)?;
        self.txs.update_max_flushed(flushed)?;
        self.txs.note_finished(txn_id);
        Ok(())
    }

    /// Writes a batch of pairs under one txn id and one WAL batch.
    pub fn put_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), DbError> {
        self.ensure_open()?;
        for (key, value) in &entries {
            Self::validate_entry(key, value)?;
        }
        let txn_id = self.txs.fresh_txn_id();

        let mut records = Vec::with_capacity(entries.len() + 2);
        records.push(WalRecord::Begin(txn_id));
        for (key, value) in &entries {
            records.push(WalRecord::Put {
                txn_id,
                key: key.clone(),
                value: value.clone(),
            });
        }
        records.push(WalRecord::Commit(txn_id));
        self.wal.append_batch(&records)?;

        let flushed = self.engine.put_batch(entries, txn_id)?;
        self.txs.update_max_flushed(flushed)?;
        self.txs.note_finished(txn_id);
        Ok(())
    }

    /// Deletes `key` (auto-committed tombstone write).
    pub fn remove(&self, key: Vec<u8>) -> Result<(), DbError> {
        self.ensure_open()?;
        Self::validate_entry(&key, &[])?;
        let txn_id = self.txs.fresh_txn_id();
        self.wal.append_batch(&[
            WalRecord::Begin(txn_id),
            WalRecord::Delete {
                txn_id,
                key: key.clone(),
            },
            WalRecord::Commit(txn_id),
        ])?;
        let flushed = self.engine.remove(key, txn_id)?;
        self.txs.update_max_flushed(flushed)?;
        self.txs.note_finished(txn_id);
        Ok(())
    }

    /// Deletes a batch of keys under one txn id and one WAL batch.
    pub fn remove_batch(&self, keys: Vec<Vec<u8>>) -> Result<(), DbError> {
        self.ensure_open()?;
        for key in &keys {
            Self::validate_entry(key, &[])?;
        }
        let txn_id = self.txs.fresh_txn_id();

        let mut records = Vec::with_capacity(keys.len() + 2);
        records.push(WalRecord::Begin(txn_id));
        for key in &keys {
            records.push(WalRecord::Delete {
                txn_id,
                key: key.clone(),
            });
        }
        records.push(WalRecord::Commit(txn_id));
        self.wal.append_batch(&records)?;

        let flushed = self.engine.remove_batch(keys, txn_id)?;
        self.txs.update_max_flushed(flushed)?;
        self.txs.note_finished(txn_id);
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Transactions
    // --------------------------------------------------------------------------------------------

    /// Opens a multi-statement transaction at the given isolation level.
    pub fn begin_transaction(&self, isolation: IsolationLevel) -> Result<TxContext, DbError> {
        self.ensure_open()?;
        Ok(self
            .txs
            .begin(Arc::clone(&self.engine), Arc::clone(&self.wal), isolation)?)
    }

    // --------------------------------------------------------------------------------------------
    // Scans
    // --------------------------------------------------------------------------------------------

    /// Ordered cursor over every live key.
    pub fn iter(&self) -> Result<DbIterator, DbError> {
        self.ensure_open()?;
        Ok(TombstoneFilter::new(self.engine.begin(0)?)?)
    }

    /// Ordered cursor over keys starting with `prefix`.
    pub fn iter_prefix(&self, prefix: &[u8]) -> Result<DbIterator, DbError> {
        let prefix = prefix.to_vec();
        self.iter_predicate(move |key: &[u8]| {
            if key.starts_with(&prefix) {
                Ordering::Equal
            } else if key < prefix.as_slice() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        })
    }

    /// Ordered cursor over the contiguous run of keys on which `pred`
    /// returns `Equal`. The predicate must be monotone: `Less` below the
    /// run, `Greater` above it.
    pub fn iter_predicate<F>(&self, pred: F) -> Result<DbIterator, DbError>
    where
        F: Fn(&[u8]) -> Ordering + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let pred: KeyPredicate = Arc::new(pred);
        Ok(TombstoneFilter::new(
            self.engine.iters_monotone_predicate(0, pred)?,
        )?)
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance & lifecycle
    // --------------------------------------------------------------------------------------------

    /// Flushes the oldest memtable to level 0.
    pub fn flush(&self) -> Result<(), DbError> {
        self.ensure_open()?;
        let flushed = self.engine.flush()?;
        self.txs.update_max_flushed(flushed)?;
        Ok(())
    }

    /// Flushes every memtable to level 0.
    pub fn flush_all(&self) -> Result<(), DbError> {
        self.ensure_open()?;
        let flushed = self.engine.flush_all()?;
        self.txs.update_max_flushed(flushed)?;
        Ok(())
    }

    /// Deletes every key, table, and log segment. Ids stay monotone.
    pub fn clear(&self) -> Result<(), DbError> {
        self.ensure_open()?;
        self.engine.clear()?;
        self.wal.reset()?;
        Ok(())
    }

    /// Engine statistics snapshot.
    pub fn stats(&self) -> Result<EngineStats, DbError> {
        self.ensure_open()?;
        Ok(self.engine.stats()?)
    }

    /// Gracefully shuts down: flushes everything and persists the
    /// transaction state. Idempotent; later operations return
    /// [`DbError::Closed`].
    pub fn close(&self) -> Result<(), DbError> {
        if self.closed.swap(true, AtomicOrdering::SeqCst) {
            return Ok(());
        }
        let flushed = self.engine.flush_all()?;
        self.txs.update_max_flushed(flushed)?;
        self.txs.persist()?;
        info!("store closed");
        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if !self.closed.load(AtomicOrdering::SeqCst) {
            if let Err(e) = self.close() {
                warn!(error = %e, "close on drop failed");
            }
        }
    }
}

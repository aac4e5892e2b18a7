//! # Transaction Module
//!
//! Monotone transaction ids, isolation levels, conflict detection, and
//! the persistent watermark state.
//!
//! ## Id allocation & watermarks
//!
//! [`TxManager`] hands out ids from an atomic counter and tracks three
//! watermarks, persisted as a 24-byte file named `tranc_id` (three
//! little-endian `u64`s):
//!
//! - `next_txn_id` — the next id to allocate,
//! - `max_flushed_txn_id` — the highest id durably flushed into an SST;
//!   recovery replays only WAL transactions beyond it,
//! - `max_finished_txn_id` — the highest committed/aborted id (in-memory
//!   bookkeeping; persisted only as a diagnostic).
//!
//! Watermarks only move forward, via compare-exchange.
//!
//! ## Isolation levels
//!
//! - **ReadUncommitted** — writes hit the engine immediately; a rollback
//!   map restores prior values on abort.
//! - **ReadCommitted** — writes buffer; reads go to the engine at the
//!   transaction's own id each time.
//! - **RepeatableRead** — as ReadCommitted, plus reads memoize so every
//!   re-read returns the first answer.
//! - **Serializable** — treated as RepeatableRead: same snapshot reads
//!   and the same commit-time write-conflict check. True serializability
//!   (predicate locking, anti-dependency tracking) is not implemented.
//!
//! ## Commit protocol (buffered levels)
//!
//! Take the memtable's two locks exclusively; for every buffered write,
//! reject if any layer holds a newer version of the key; then append the
//! operations plus a Commit record as **one fsynced WAL batch**; only
//! then apply the writes to the memtable and release the locks.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::engine::utils::TxnId;
use crate::engine::{Engine, EngineError};
use crate::fileio::{read_state_file, write_state_file, FileIoError};
use crate::wal::{Wal, WalError, WalRecord};

/// Name of the watermark state file inside the engine directory.
pub const TXN_STATE_FILE: &str = "tranc_id";

/// Errors returned by the transaction layer.
#[derive(Debug, Error)]
pub enum TxError {
    /// Operation on a transaction that already committed or aborted.
    #[error("transaction {0} is no longer active")]
    NotActive(TxnId),

    /// Underlying engine failure.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// WAL failure; on commit the transaction stays Active for retry.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Watermark state file failure.
    #[error("file error: {0}")]
    File(#[from] FileIoError),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Read/write visibility policy of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// See and publish everything immediately.
    ReadUncommitted,
    /// Snapshot reads at the transaction's id; buffered writes.
    ReadCommitted,
    /// Snapshot reads plus read memoization; commit-time conflict check.
    RepeatableRead,
    /// Alias of RepeatableRead in this engine.
    Serializable,
}

impl IsolationLevel {
    /// Whether writes buffer until commit (everything except
    /// ReadUncommitted).
    fn buffers_writes(&self) -> bool {
        !matches!(self, IsolationLevel::ReadUncommitted)
    }

    /// Whether reads memoize for repeatability.
    fn memoizes_reads(&self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead | IsolationLevel::Serializable)
    }
}

/// Lifecycle state of a transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting operations.
    Active,
    /// Durably committed.
    Committed,
    /// Rolled back; operations are rejected.
    Aborted,
}

// ------------------------------------------------------------------------------------------------
// TxManager
// ------------------------------------------------------------------------------------------------

/// Allocates transaction ids and owns the persistent watermarks.
pub struct TxManager {
    next_txn_id: AtomicU64,
    max_flushed_txn_id: AtomicU64,
    max_finished_txn_id: AtomicU64,
    state_path: PathBuf,
    /// Serializes state-file rewrites.
    persist_lock: Mutex<()>,
    /// Ids of transactions currently in flight.
    active: Mutex<HashSet<TxnId>>,
}

impl TxManager {
    /// Loads (or initializes) the watermark state from `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, TxError> {
        let state_path = dir.as_ref().join(TXN_STATE_FILE);
        let (next, flushed, finished) = match read_state_file(&state_path, 3)? {
            Some(words) => (words[0].max(1), words[1], words[2]),
            None => (1, 0, 0),
        };
        info!(
            next_txn_id = next,
            max_flushed = flushed,
            max_finished = finished,
            "transaction state loaded"
        );
        Ok(Self {
            next_txn_id: AtomicU64::new(next),
            max_flushed_txn_id: AtomicU64::new(flushed),
            max_finished_txn_id: AtomicU64::new(finished),
            state_path,
            persist_lock: Mutex::new(()),
            active: Mutex::new(HashSet::new()),
        })
    }

    /// Allocates a fresh, monotone transaction id.
    pub fn fresh_txn_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Highest id durably flushed into an SST.
    pub fn max_flushed(&self) -> TxnId {
        self.max_flushed_txn_id.load(Ordering::SeqCst)
    }

    /// Highest id that committed or aborted.
    pub fn max_finished(&self) -> TxnId {
        self.max_finished_txn_id.load(Ordering::SeqCst)
    }

    /// Number of transactions currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Moves the flushed watermark forward (never backward) and persists
    /// the state file. A zero id is the "no flush happened" signal and is
    /// ignored.
    pub fn update_max_flushed(&self, txn_id: TxnId) -> Result<(), TxError> {
        if txn_id == 0 || !advance(&self.max_flushed_txn_id, txn_id) {
            return Ok(());
        }
        self.persist()
    }

    /// Moves the finished watermark forward (in-memory only).
    pub fn note_finished(&self, txn_id: TxnId) {
        advance(&self.max_finished_txn_id, txn_id);
    }

    /// Re-seats the id allocator after recovery so it stays above every
    /// id observed in the WAL or the SSTs.
    pub fn ensure_next_txn_id(&self, floor: TxnId) {
        advance(&self.next_txn_id, floor);
    }

    /// Rewrites the `tranc_id` state file from the current counters.
    pub fn persist(&self) -> Result<(), TxError> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|_| TxError::Internal("mutex poisoned".into()))?;
        write_state_file(
            &self.state_path,
            &[
                self.next_txn_id.load(Ordering::SeqCst),
                self.max_flushed_txn_id.load(Ordering::SeqCst),
                self.max_finished_txn_id.load(Ordering::SeqCst),
            ],
        )?;
        trace!("transaction state persisted");
        Ok(())
    }

    /// Opens a transaction against `engine`/`wal`.
    pub fn begin(
        self: &Arc<Self>,
        engine: Arc<Engine>,
        wal: Arc<Wal>,
        isolation: IsolationLevel,
    ) -> Result<TxContext, TxError> {
        let txn_id = self.fresh_txn_id();
        self.active
            .lock()
            .map_err(|_| TxError::Internal("mutex poisoned".into()))?
            .insert(txn_id);
        debug!(txn_id, ?isolation, "transaction begun");

        Ok(TxContext {
            txn_id,
            isolation,
            engine,
            wal,
            manager: Arc::clone(self),
            operations: vec![WalRecord::Begin(txn_id)],
            temp_writes: BTreeMap::new(),
            read_set: HashMap::new(),
            rollback_map: HashMap::new(),
            state: TxState::Active,
        })
    }

    fn finish(&self, txn_id: TxnId) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&txn_id);
        }
        self.note_finished(txn_id);
    }
}

/// Compare-exchange `target` forward to at least `value`; returns whether
/// it actually moved.
fn advance(target: &AtomicU64, value: u64) -> bool {
    let mut current = target.load(Ordering::SeqCst);
    loop {
        if current >= value {
            return false;
        }
        match target.compare_exchange(current, value, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TxContext
// ------------------------------------------------------------------------------------------------

/// One in-flight transaction.
///
/// Created by [`TxManager::begin`]; ends in exactly one `commit` or
/// `abort`. Operations after that return [`TxError::NotActive`].
pub struct TxContext {
    txn_id: TxnId,
    isolation: IsolationLevel,
    engine: Arc<Engine>,
    wal: Arc<Wal>,
    manager: Arc<TxManager>,

    /// WAL records buffered for the commit batch (starts with Begin).
    operations: Vec<WalRecord>,

    /// Buffered writes at the buffering isolation levels; empty value =
    /// delete.
    temp_writes: BTreeMap<Vec<u8>, Vec<u8>>,

    /// Memoized reads (RepeatableRead/Serializable): key → the value and
    /// writer id first observed, or `None` for a first-read miss.
    read_set: HashMap<Vec<u8>, Option<(Vec<u8>, TxnId)>>,

    /// Prior engine values captured by ReadUncommitted before its
    /// in-place writes; `None` = the key was absent.
    rollback_map: HashMap<Vec<u8>, Option<Vec<u8>>>,

    state: TxState,
}

impl TxContext {
    /// This transaction's id (also its snapshot).
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Isolation level in effect.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        self.state
    }

    fn ensure_active(&self) -> Result<(), TxError> {
        if self.state == TxState::Active {
            Ok(())
        } else {
            Err(TxError::NotActive(self.txn_id))
        }
    }

    /// Writes `key → value` inside the transaction.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), TxError> {
        self.ensure_active()?;
        crate::engine::utils::validate_entry(&key, &value)
            .map_err(|msg| TxError::Engine(EngineError::InvalidEntry(msg)))?;
        self.operations.push(WalRecord::Put {
            txn_id: self.txn_id,
            key: key.clone(),
            value: value.clone(),
        });

        if self.isolation.buffers_writes() {
            self.temp_writes.insert(key, value);
            return Ok(());
        }

        // ReadUncommitted: capture the prior value once, then write
        // straight through.
        if !self.rollback_map.contains_key(&key) {
            let prior = self.engine.get(&key, 0)?;
            self.rollback_map.insert(key.clone(), prior);
        }
        let flushed = self.engine.put(key, value, self.txn_id)?;
        self.manager.update_max_flushed(flushed)?;
        Ok(())
    }

    /// Deletes `key` inside the transaction.
    pub fn remove(&mut self, key: Vec<u8>) -> Result<(), TxError> {
        self.ensure_active()?;
        crate::engine::utils::validate_entry(&key, &[])
            .map_err(|msg| TxError::Engine(EngineError::InvalidEntry(msg)))?;
        self.operations.push(WalRecord::Delete {
            txn_id: self.txn_id,
            key: key.clone(),
        });

        if self.isolation.buffers_writes() {
            self.temp_writes.insert(key, Vec::new());
            return Ok(());
        }

        if !self.rollback_map.contains_key(&key) {
            let prior = self.engine.get(&key, 0)?;
            self.rollback_map.insert(key.clone(), prior);
        }
        let flushed = self.engine.remove(key, self.txn_id)?;
        self.manager.update_max_flushed(flushed)?;
        Ok(())
    }

    /// Reads `key` with this transaction's visibility rules. Own writes
    /// are always visible first.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TxError> {
        self.ensure_active()?;

        if let Some(value) = self.temp_writes.get(key) {
            return Ok(if value.is_empty() {
                None
            } else {
                Some(value.clone())
            });
        }

        match self.isolation {
            IsolationLevel::ReadUncommitted => Ok(self.engine.get(key, 0)?),
            IsolationLevel::ReadCommitted => Ok(self.engine.get(key, self.txn_id)?),
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                if let Some(memo) = self.read_set.get(key) {
                    return Ok(memo.as_ref().map(|(value, _)| value.clone()));
                }
                let entry = self
                    .engine
                    .get_entry(key, self.txn_id)?
                    .filter(|entry| !entry.is_tombstone());
                let memo = entry.map(|entry| (entry.value, entry.txn_id));
                self.read_set.insert(key.to_vec(), memo.clone());
                Ok(memo.map(|(value, _)| value))
            }
        }
    }

    /// Commits the transaction.
    ///
    /// Returns `Ok(false)` — with the context Aborted and its buffered
    /// writes discarded — when a write-conflict is detected: some other
    /// transaction committed a newer version of a key this transaction
    /// wrote. A WAL failure leaves the context Active so the caller may
    /// retry.
    pub fn commit(&mut self) -> Result<bool, TxError> {
        self.ensure_active()?;

        if !self.isolation.buffers_writes() {
            // Writes are already applied; the batch just needs to become
            // durable.
            self.operations.push(WalRecord::Commit(self.txn_id));
            if let Err(e) = self.wal.append_batch(&self.operations) {
                self.operations.pop();
                return Err(e.into());
            }
            self.state = TxState::Committed;
            self.manager.finish(self.txn_id);
            debug!(txn_id = self.txn_id, "read-uncommitted commit durable");
            return Ok(true);
        }

        // Conflict check and apply are one critical section over the
        // memtable; nothing can commit a competing write in between.
        let mut guard = self.engine.memtable_write_guard()?;

        let check_ssts = self.manager.max_flushed() > self.txn_id;
        let mut conflict = false;
        for key in self.temp_writes.keys() {
            let newer = match guard.get(key, 0) {
                Some(entry) => entry.txn_id > self.txn_id,
                None if check_ssts => match self.engine.sst_get_entry(key, 0)? {
                    Some(entry) => entry.txn_id > self.txn_id,
                    None => false,
                },
                None => false,
            };
            if newer {
                conflict = true;
                break;
            }
        }
        if conflict {
            drop(guard);
            self.state = TxState::Aborted;
            self.temp_writes.clear();
            self.operations.clear();
            self.manager.finish(self.txn_id);
            info!(txn_id = self.txn_id, "commit rejected: write conflict");
            return Ok(false);
        }

        self.operations.push(WalRecord::Commit(self.txn_id));
        if let Err(e) = self.wal.append_batch(&self.operations) {
            // Stay Active: the caller may retry the commit.
            self.operations.pop();
            drop(guard);
            warn!(txn_id = self.txn_id, error = %e, "commit WAL write failed");
            return Err(e.into());
        }

        for (key, value) in std::mem::take(&mut self.temp_writes) {
            guard.put(key, value, self.txn_id);
        }
        drop(guard);

        self.state = TxState::Committed;
        self.manager.finish(self.txn_id);
        debug!(txn_id = self.txn_id, "transaction committed");
        Ok(true)
    }

    /// Aborts the transaction.
    ///
    /// Buffered levels simply discard their writes; ReadUncommitted
    /// restores the captured prior values through the engine.
    pub fn abort(&mut self) -> Result<(), TxError> {
        match self.state {
            TxState::Active => {}
            TxState::Aborted => return Ok(()),
            TxState::Committed => return Err(TxError::NotActive(self.txn_id)),
        }

        if !self.isolation.buffers_writes() {
            for (key, prior) in std::mem::take(&mut self.rollback_map) {
                let flushed = match prior {
                    // Same (key, id) slot: overwrites the in-place write
                    // with what was there before.
                    Some(value) => self.engine.put(key, value, self.txn_id)?,
                    None => self.engine.remove(key, self.txn_id)?,
                };
                self.manager.update_max_flushed(flushed)?;
            }
        }

        self.temp_writes.clear();
        self.operations.clear();
        self.state = TxState::Aborted;
        self.manager.finish(self.txn_id);
        self.wal.append_batch(&[WalRecord::Rollback(self.txn_id)])?;
        debug!(txn_id = self.txn_id, "transaction aborted");
        Ok(())
    }
}

impl Drop for TxContext {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            warn!(
                txn_id = self.txn_id,
                "transaction dropped while active; aborting"
            );
            if let Err(e) = self.abort() {
                warn!(txn_id = self.txn_id, error = %e, "abort on drop failed");
            }
        }
    }
}

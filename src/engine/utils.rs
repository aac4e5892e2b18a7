//! Engine utilities — the shared entry type and version-ordering rules used
//! by every layer (skip list, blocks, SSTs, merge iterators, transactions).

use std::cmp::Ordering;

/// Monotonically-assigned transaction identifier.
///
/// Id `0` is special: it means "no transaction context" and disables
/// visibility filtering — a read at id 0 sees the newest version of every
/// key, and a write at id 0 sorts below every transactional version.
pub type TxnId = u64;

/// The logical record stored at every layer of the engine.
///
/// An empty `value` is a **tombstone**: the key was deleted at `txn_id`.
/// Tombstones flow through memtables, SSTs, and compaction unchanged; they
/// are only filtered out at the outermost read surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// User key.
    pub key: Vec<u8>,

    /// Value bytes; empty means deleted.
    pub value: Vec<u8>,

    /// Transaction id that wrote this version.
    pub txn_id: TxnId,
}

impl Entry {
    /// Whether this entry marks a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

/// Largest key the wire format can carry (`u16` length prefix).
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Largest inline value the wire format can carry (`u16` length prefix).
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Rejects keys and values the store cannot represent: empty keys (the
/// empty key is reserved for internal sentinels) and parts beyond the
/// `u16` length prefixes.
pub fn validate_entry(key: &[u8], value: &[u8]) -> Result<(), String> {
    if key.is_empty() {
        return Err("key must not be empty".to_string());
    }
    if key.len() > MAX_KEY_LEN {
        return Err(format!("key of {} bytes exceeds {MAX_KEY_LEN}", key.len()));
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(format!(
            "value of {} bytes exceeds {MAX_VALUE_LEN}",
            value.len()
        ));
    }
    Ok(())
}

/// Orders versioned keys: key ascending, then transaction id **descending**.
///
/// Newer versions of the same key sort first, so a forward walk naturally
/// yields the newest visible version before any older one.
pub fn version_cmp(a_key: &[u8], a_txn: TxnId, b_key: &[u8], b_txn: TxnId) -> Ordering {
    match a_key.cmp(b_key) {
        Ordering::Equal => b_txn.cmp(&a_txn),
        ord => ord,
    }
}

/// Whether a version written at `entry_txn` is visible to a reader pinned
/// at `snapshot`. Snapshot id 0 sees everything.
pub fn is_visible(entry_txn: TxnId, snapshot: TxnId) -> bool {
    snapshot == 0 || entry_txn <= snapshot
}

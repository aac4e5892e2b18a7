//! # Block Module
//!
//! The block is the smallest independently encoded, cached, and searched
//! unit of an SST. A block holds a sorted run of versioned entries plus an
//! offset index for binary search.
//!
//! # On-disk layout
//!
//! ```text
//! [ENTRY]…[ENTRY] [u16 offset]…[u16 offset] [u16 entry_count]
//! ```
//!
//! Each entry is `[u16 key_len][key][u16 value_len][value][u64 txn_id]`.
//! Entries are key-sorted; within equal keys, txn-id **descending**. The
//! SST builder appends a `u32` CRC32 over the encoded block; decoding with
//! `with_hash` verifies it.
//!
//! # Guarantees
//!
//! - **Integrity:** hash verification plus structural validation (trailer
//!   sizes, offset bounds, entry bounds) on every decode.
//! - **Versioned lookups:** a point search lands on the newest version of
//!   the key visible at the reader's snapshot id.
//! - **Monotone-predicate ranges:** two binary searches yield the matching
//!   index range; a contradiction between the predicate and the stored
//!   order is reported as corruption.

pub mod iterator;


use std::cmp::Ordering;

use thiserror::Error;

use crate::encoding::{get_bytes16_ref, put_bytes16, EncodingError};
use crate::engine::utils::{version_cmp, Entry, TxnId};

pub use iterator::BlockIterator;

const SIZEOF_U16: usize = std::mem::size_of::<u16>();
const SIZEOF_U32: usize = std::mem::size_of::<u32>();
const SIZEOF_U64: usize = std::mem::size_of::<u64>();

/// Errors returned by block encoding, decoding, and search.
#[derive(Debug, Error)]
pub enum BlockError {
    /// The trailing CRC32 did not match the block contents.
    #[error("block hash mismatch")]
    HashMismatch,

    /// Structural corruption: sizes or offsets that cannot be valid.
    #[error("malformed block: {0}")]
    Malformed(String),

    /// A monotone predicate contradicted the stored key order.
    #[error("block not sorted")]
    NotSorted,

    /// Wire-format error while parsing an entry.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

/// A sorted run of versioned entries with an offset index.
#[derive(Debug, Clone)]
pub struct Block {
    /// Concatenated encoded entries.
    data: Vec<u8>,

    /// Start offset of each entry within `data`.
    offsets: Vec<u16>,

    /// Target max encoded size; advisory only after decode.
    capacity: usize,
}

/// Equality is over contents (entries and offsets); the capacity is a
/// build-time knob, not part of the encoded form.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.offsets == other.offsets
    }
}

impl Eq for Block {}

impl Block {
    /// Creates an empty block with the given target encoded size.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            offsets: Vec::new(),
            capacity,
        }
    }

    /// Number of entries.
    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the block has no entries.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Size of `encode()`'s output for the current contents.
    pub fn encoded_size(&self) -> usize {
        self.data.len() + self.offsets.len() * SIZEOF_U16 + SIZEOF_U16
    }

    /// Appends an entry.
    ///
    /// Returns `false` (rejecting the entry) when the projected encoded
    /// size would exceed the capacity and the block already holds data;
    /// the builder treats that as "seal and start a new block". `force`
    /// bypasses the capacity check so an oversized entry still lands in
    /// its own block.
    pub fn add_entry(&mut self, key: &[u8], value: &[u8], txn_id: TxnId, force: bool) -> bool {
        let entry_size = SIZEOF_U16 + key.len() + SIZEOF_U16 + value.len() + SIZEOF_U64;
        let projected = self.encoded_size() + entry_size + SIZEOF_U16;
        if !force && !self.is_empty() && projected > self.capacity {
            return false;
        }

        // Offsets are u16; the capacity check (bounded by u16 in config)
        // keeps multi-entry blocks in range, and a forced oversized entry
        // is always the sole entry at offset 0.
        self.offsets.push(self.data.len() as u16);
        // Writing only ever appends bytes already bounded at the API edge,
        // so the length prefixes cannot overflow here.
        let _ = put_bytes16(&mut self.data, key);
        let _ = put_bytes16(&mut self.data, value);
        self.data.extend_from_slice(&txn_id.to_le_bytes());
        true
    }

    /// Serializes to `data | offsets | u16 count`. The trailing hash, when
    /// used, is appended by the SST builder — not here.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        buf.extend_from_slice(&self.data);
        for offset in &self.offsets {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        buf.extend_from_slice(&(self.offsets.len() as u16).to_le_bytes());
        buf
    }

    /// Reverses [`Block::encode`].
    ///
    /// With `with_hash`, the final `u32` is verified as a CRC32 over the
    /// preceding bytes first. Every entry is bounds-checked so accessors
    /// can never read out of range afterwards.
    pub fn decode(bytes: &[u8], with_hash: bool) -> Result<Self, BlockError> {
        let body = if with_hash {
            if bytes.len() < SIZEOF_U32 {
                return Err(BlockError::Malformed(
                    "block shorter than its hash".to_string(),
                ));
            }
            let (body, hash_bytes) = bytes.split_at(bytes.len() - SIZEOF_U32);
            let stored = u32::from_le_bytes([
                hash_bytes[0],
                hash_bytes[1],
                hash_bytes[2],
                hash_bytes[3],
            ]);
            if crc32fast::hash(body) != stored {
                return Err(BlockError::HashMismatch);
            }
            body
        } else {
            bytes
        };

        if body.len() < SIZEOF_U16 {
            return Err(BlockError::Malformed(
                "block shorter than its trailer".to_string(),
            ));
        }
        let count =
            u16::from_le_bytes([body[body.len() - SIZEOF_U16], body[body.len() - 1]]) as usize;

        let offsets_len = count * SIZEOF_U16;
        let Some(data_end) = body.len().checked_sub(SIZEOF_U16 + offsets_len) else {
            return Err(BlockError::Malformed(format!(
                "entry count {count} does not fit in {} bytes",
                body.len()
            )));
        };

        let mut offsets = Vec::with_capacity(count);
        for chunk in body[data_end..body.len() - SIZEOF_U16].chunks_exact(SIZEOF_U16) {
            offsets.push(u16::from_le_bytes([chunk[0], chunk[1]]));
        }
        let data = body[..data_end].to_vec();

        let block = Self {
            capacity: bytes.len(),
            data,
            offsets,
        };
        block.validate()?;
        Ok(block)
    }

    /// Bounds-checks every entry once so later accessors are infallible.
    fn validate(&self) -> Result<(), BlockError> {
        for (i, &offset) in self.offsets.iter().enumerate() {
            let offset = offset as usize;
            if offset >= self.data.len() && !(offset == 0 && self.data.is_empty()) {
                return Err(BlockError::Malformed(format!(
                    "entry {i} offset {offset} out of range"
                )));
            }
            let rest = &self.data[offset..];
            let (_key, n) = get_bytes16_ref(rest)?;
            let (_value, m) = get_bytes16_ref(&rest[n..])?;
            let tail = &rest[n + m..];
            if tail.len() < SIZEOF_U64 {
                return Err(BlockError::Malformed(format!(
                    "entry {i} truncated before its txn id"
                )));
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Entry accessors — valid indices only; blocks are validated on decode
    // and builder-produced blocks are well-formed by construction.
    // --------------------------------------------------------------------------------------------

    fn entry_parts(&self, idx: usize) -> (&[u8], &[u8], TxnId) {
        let offset = self.offsets[idx] as usize;
        let rest = self.data.get(offset..).unwrap_or(&[]);
        let Ok((key, n)) = get_bytes16_ref(rest) else {
            return (&[], &[], 0);
        };
        let Ok((value, m)) = get_bytes16_ref(&rest[n..]) else {
            return (key, &[], 0);
        };
        let tail = &rest[n + m..];
        if tail.len() < SIZEOF_U64 {
            return (key, value, 0);
        }
        let mut id = [0u8; SIZEOF_U64];
        id.copy_from_slice(&tail[..SIZEOF_U64]);
        (key, value, TxnId::from_le_bytes(id))
    }

    /// Key of the entry at `idx`.
    pub fn key_at(&self, idx: usize) -> &[u8] {
        self.entry_parts(idx).0
    }

    /// Value of the entry at `idx` (empty for tombstones).
    pub fn value_at(&self, idx: usize) -> &[u8] {
        self.entry_parts(idx).1
    }

    /// Transaction id of the entry at `idx`.
    pub fn txn_at(&self, idx: usize) -> TxnId {
        self.entry_parts(idx).2
    }

    /// Owned entry at `idx`.
    pub fn entry_at(&self, idx: usize) -> Entry {
        let (key, value, txn_id) = self.entry_parts(idx);
        Entry {
            key: key.to_vec(),
            value: value.to_vec(),
            txn_id,
        }
    }

    /// Key of the first entry; empty when the block is empty.
    pub fn first_key(&self) -> &[u8] {
        if self.is_empty() {
            &[]
        } else {
            self.key_at(0)
        }
    }

    /// Key of the last entry; empty when the block is empty.
    pub fn last_key(&self) -> &[u8] {
        if self.is_empty() {
            &[]
        } else {
            self.key_at(self.num_entries() - 1)
        }
    }

    // --------------------------------------------------------------------------------------------
    // Search
    // --------------------------------------------------------------------------------------------

    /// Index of the first entry at or after `(key, txn_id)` in version
    /// order. `txn_id == 0` targets the newest version of `key`.
    fn lower_bound(&self, key: &[u8], txn_id: TxnId) -> usize {
        let target_txn = if txn_id == 0 { TxnId::MAX } else { txn_id };
        let (mut low, mut high) = (0usize, self.num_entries());
        while low < high {
            let mid = low + (high - low) / 2;
            let (mid_key, _, mid_txn) = self.entry_parts(mid);
            if version_cmp(mid_key, mid_txn, key, target_txn) == Ordering::Less {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    /// Finds the newest version of `key` visible at `txn_id`.
    ///
    /// Equal keys are stored id-descending, so the version-order lower
    /// bound is already adjusted past any too-new versions; all that
    /// remains is to confirm the landing entry carries the right key.
    pub fn get(&self, key: &[u8], txn_id: TxnId) -> Option<usize> {
        let idx = self.lower_bound(key, txn_id);
        if idx < self.num_entries() && self.key_at(idx) == key {
            Some(idx)
        } else {
            None
        }
    }

    /// Index range `[first, last+1)` of entries whose keys satisfy the
    /// monotone `pred` (see
    /// [`SkipList::iters_monotone_predicate`](crate::skiplist::SkipList::iters_monotone_predicate)
    /// for the predicate contract).
    ///
    /// Returns [`BlockError::NotSorted`] when the predicate's verdicts
    /// contradict the stored order — a latent corruption check.
    pub fn monotone_predicate<F>(&self, pred: F) -> Result<Option<(usize, usize)>, BlockError>
    where
        F: Fn(&[u8]) -> Ordering,
    {
        let n = self.num_entries();

        // Left edge: first entry not below the range.
        let (mut low, mut high) = (0usize, n);
        while low < high {
            let mid = low + (high - low) / 2;
            if pred(self.key_at(mid)) == Ordering::Less {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        let first = low;
        if first == n || pred(self.key_at(first)) != Ordering::Equal {
            return Ok(None);
        }

        // Right edge: first entry above the range. Anything below the
        // range on this side contradicts the sort order.
        let (mut low, mut high) = (first, n);
        while low < high {
            let mid = low + (high - low) / 2;
            match pred(self.key_at(mid)) {
                Ordering::Equal => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Less => return Err(BlockError::NotSorted),
            }
        }

        Ok(Some((first, low)))
    }
}

//! # Write-Ahead Log Module
//!
//! A durable, append-only log of per-transaction records, written in
//! atomically-fsynced **batches** — one batch per commit. Recovery replays
//! committed transactions whose id lies beyond the flushed watermark.
//!
//! # On-disk layout
//!
//! Segment files named `wal.<seq>` in the engine directory:
//!
//! ```text
//! [u32 batch_len][records…]    × per batch
//! ```
//!
//! Each record is `u8 kind | u64 txn_id | (u16 klen | key)? | (u16 vlen |
//! value)?` with kinds 0=Begin, 1=Put (key+value), 2=Delete (key),
//! 3=Commit, 4=Rollback. All integers little-endian. Segments rotate once
//! a size threshold is exceeded.
//!
//! # Guarantees
//!
//! - **Atomic batches:** a batch is written with one `write_all` and one
//!   fsync; a crash can only truncate the tail batch, never interleave.
//! - **Replay discipline:** only transactions that end in a Commit and
//!   whose id exceeds the flushed watermark are replayed; rolled-back and
//!   unfinished transactions are discarded.
//! - **Truncation tolerance:** a torn tail batch ends replay with a
//!   warning instead of an error — everything before it is intact.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::encoding::{get_bytes16, put_bytes16, Decode, Encode, EncodingError};
use crate::engine::utils::TxnId;

const SIZEOF_U32: usize = std::mem::size_of::<u32>();

/// Upper bound on one batch's byte length — guards recovery against
/// allocation bombs from a corrupt length prefix.
const MAX_BATCH_LEN: u32 = 64 * 1024 * 1024;

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Wire-format error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Structurally impossible framing.
    #[error("malformed WAL: {0}")]
    Malformed(String),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

const KIND_BEGIN: u8 = 0;
const KIND_PUT: u8 = 1;
const KIND_DELETE: u8 = 2;
const KIND_COMMIT: u8 = 3;
const KIND_ROLLBACK: u8 = 4;

/// One logical operation inside a transaction's WAL stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Transaction opened.
    Begin(TxnId),

    /// Key written.
    Put {
        /// Owning transaction.
        txn_id: TxnId,
        /// Key written.
        key: Vec<u8>,
        /// Value written.
        value: Vec<u8>,
    },

    /// Key deleted.
    Delete {
        /// Owning transaction.
        txn_id: TxnId,
        /// Key deleted.
        key: Vec<u8>,
    },

    /// Transaction committed — its effects are durable from here on.
    Commit(TxnId),

    /// Transaction abandoned; its records are ignored by recovery.
    Rollback(TxnId),
}

impl WalRecord {
    /// Id of the owning transaction.
    pub fn txn_id(&self) -> TxnId {
        match self {
            WalRecord::Begin(id)
            | WalRecord::Commit(id)
            | WalRecord::Rollback(id) => *id,
            WalRecord::Put { txn_id, .. } | WalRecord::Delete { txn_id, .. } => *txn_id,
        }
    }
}

impl Encode for WalRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            WalRecord::Begin(id) => {
                KIND_BEGIN.encode_to(buf)?;
                id.encode_to(buf)?;
            }
            WalRecord::Put { txn_id, key, value } => {
                KIND_PUT.encode_to(buf)?;
                txn_id.encode_to(buf)?;
                put_bytes16(buf, key)?;
                put_bytes16(buf, value)?;
            }
            WalRecord::Delete { txn_id, key } => {
                KIND_DELETE.encode_to(buf)?;
                txn_id.encode_to(buf)?;
                put_bytes16(buf, key)?;
            }
            WalRecord::Commit(id) => {
                KIND_COMMIT.encode_to(buf)?;
                id.encode_to(buf)?;
            }
            WalRecord::Rollback(id) => {
                KIND_ROLLBACK.encode_to(buf)?;
                id.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for WalRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (kind, mut offset) = u8::decode_from(buf)?;
        let (txn_id, n) = TxnId::decode_from(&buf[offset..])?;
        offset += n;

        let record = match kind {
            KIND_BEGIN => WalRecord::Begin(txn_id),
            KIND_PUT => {
                let (key, n) = get_bytes16(&buf[offset..])?;
                offset += n;
                let (value, n) = get_bytes16(&buf[offset..])?;
                offset += n;
                WalRecord::Put { txn_id, key, value }
            }
            KIND_DELETE => {
                let (key, n) = get_bytes16(&buf[offset..])?;
                offset += n;
                WalRecord::Delete { txn_id, key }
            }
            KIND_COMMIT => WalRecord::Commit(txn_id),
            KIND_ROLLBACK => WalRecord::Rollback(txn_id),
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other as u32,
                    type_name: "WalRecord",
                })
            }
        };
        Ok((record, offset))
    }
}

// ------------------------------------------------------------------------------------------------
// Wal
// ------------------------------------------------------------------------------------------------

fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("wal.{seq}"))
}

/// Parses `wal.<seq>` back into the sequence number.
fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix("wal.")?.parse::<u64>().ok()
}

struct WalSegment {
    file: File,
    seq: u64,
    written: u64,
}

/// Segmented append log; one mutex serializes the append path.
pub struct Wal {
    dir: PathBuf,
    segment_size: u64,
    segment: Mutex<WalSegment>,
}

impl Wal {
    /// Opens a fresh segment in `dir`, numbered after any segment already
    /// present (recovery reads and then deletes those — this handle never
    /// appends to a pre-existing file).
    pub fn open(dir: impl AsRef<Path>, segment_size: u64) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        let seq = Self::max_existing_seq(&dir)?.map_or(0, |s| s + 1);
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(segment_path(&dir, seq))?;
        info!(dir = %dir.display(), seq, "WAL segment opened");

        Ok(Self {
            dir,
            segment_size,
            segment: Mutex::new(WalSegment {
                file,
                seq,
                written: 0,
            }),
        })
    }

    fn max_existing_seq(dir: &Path) -> Result<Option<u64>, WalError> {
        let mut max_seq = None;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(seq) = name.to_str().and_then(parse_segment_name) {
                max_seq = Some(max_seq.map_or(seq, |m: u64| m.max(seq)));
            }
        }
        Ok(max_seq)
    }

    /// Appends one record batch and fsyncs it.
    ///
    /// The batch is the unit of atomicity: a commit's operations plus its
    /// Commit record travel in a single batch, so recovery sees either
    /// the whole transaction or none of it.
    pub fn append_batch(&self, records: &[WalRecord]) -> Result<(), WalError> {
        let mut body = Vec::new();
        for record in records {
            record.encode_to(&mut body)?;
        }
        let len = u32::try_from(body.len())
            .map_err(|_| WalError::Malformed(format!("batch of {} bytes", body.len())))?;

        let mut buf = Vec::with_capacity(SIZEOF_U32 + body.len());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&body);

        let mut segment = self
            .segment
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;
        segment.file.write_all(&buf)?;
        segment.file.sync_all()?;
        segment.written += buf.len() as u64;
        trace!(
            seq = segment.seq,
            records = records.len(),
            bytes = buf.len(),
            "WAL batch appended"
        );

        if segment.written >= self.segment_size {
            let next_seq = segment.seq + 1;
            let file = OpenOptions::new()
                .create_new(true)
                .append(true)
                .open(segment_path(&self.dir, next_seq))?;
            debug!(seq = next_seq, "WAL segment rotated");
            *segment = WalSegment {
                file,
                seq: next_seq,
                written: 0,
            };
        }
        Ok(())
    }

    /// Current segment sequence number.
    pub fn current_seq(&self) -> Result<u64, WalError> {
        Ok(self
            .segment
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?
            .seq)
    }

    /// Discards every segment on disk and starts a fresh one — the log
    /// counterpart of clearing the store. The open handle rolls to a new
    /// sequence number so no append can land in a deleted file.
    pub fn reset(&self) -> Result<(), WalError> {
        let mut segment = self
            .segment
            .lock()
            .map_err(|_| WalError::Internal("mutex poisoned".into()))?;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry
                .file_name()
                .to_str()
                .and_then(parse_segment_name)
                .is_some()
            {
                fs::remove_file(entry.path())?;
            }
        }

        let next_seq = segment.seq + 1;
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(segment_path(&self.dir, next_seq))?;
        info!(seq = next_seq, "WAL reset");
        *segment = WalSegment {
            file,
            seq: next_seq,
            written: 0,
        };
        Ok(())
    }

    /// Scans every `wal.<seq>` in `dir` (in sequence order) and returns
    /// the records of transactions that **committed** past the flushed
    /// watermark, keyed by transaction id.
    ///
    /// Rolled-back and unfinished transactions are discarded. A torn
    /// tail batch ends the scan of that segment with a warning.
    pub fn recover(
        dir: impl AsRef<Path>,
        flushed_watermark: TxnId,
    ) -> Result<BTreeMap<TxnId, Vec<WalRecord>>, WalError> {
        let dir = dir.as_ref();
        let mut seqs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(seq) = entry.file_name().to_str().and_then(parse_segment_name) {
                seqs.push(seq);
            }
        }
        seqs.sort_unstable();

        let mut streams: BTreeMap<TxnId, Vec<WalRecord>> = BTreeMap::new();
        let mut committed: BTreeSet<TxnId> = BTreeSet::new();

        for &seq in &seqs {
            let mut bytes = Vec::new();
            File::open(segment_path(dir, seq))?.read_to_end(&mut bytes)?;

            let mut offset = 0usize;
            while offset < bytes.len() {
                if bytes.len() - offset < SIZEOF_U32 {
                    warn!(seq, "torn batch length at WAL tail, stopping replay");
                    break;
                }
                let len = u32::from_le_bytes([
                    bytes[offset],
                    bytes[offset + 1],
                    bytes[offset + 2],
                    bytes[offset + 3],
                ]);
                if len > MAX_BATCH_LEN {
                    return Err(WalError::Malformed(format!(
                        "batch length {len} exceeds the {MAX_BATCH_LEN} cap"
                    )));
                }
                offset += SIZEOF_U32;
                let len = len as usize;
                if bytes.len() - offset < len {
                    warn!(seq, "torn batch body at WAL tail, stopping replay");
                    break;
                }

                let batch = &bytes[offset..offset + len];
                offset += len;

                let mut cursor = 0usize;
                while cursor < batch.len() {
                    let (record, n) = WalRecord::decode_from(&batch[cursor..])?;
                    cursor += n;
                    match &record {
                        WalRecord::Commit(id) => {
                            committed.insert(*id);
                        }
                        WalRecord::Rollback(id) => {
                            streams.remove(id);
                        }
                        _ => streams.entry(record.txn_id()).or_default().push(record),
                    }
                }
            }
        }

        streams.retain(|txn_id, _| *txn_id > flushed_watermark && committed.contains(txn_id));
        info!(
            segments = seqs.len(),
            transactions = streams.len(),
            flushed_watermark,
            "WAL recovery scan complete"
        );
        Ok(streams)
    }

    /// Deletes every `wal.<seq>` file in `dir` — called after recovery has
    /// replayed the survivors.
    pub fn remove_segments(dir: impl AsRef<Path>) -> Result<(), WalError> {
        let dir = dir.as_ref();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry
                .file_name()
                .to_str()
                .and_then(parse_segment_name)
                .is_some()
            {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

//! Per-SST bloom filter for fast negative point lookups.
//!
//! Sized once at build time from an expected entry count and a target
//! false-positive rate. Probe positions are derived from a single 32-bit
//! base hash by double-hashing, so membership checks cost one hash of the
//! key plus `num_hashes` bit probes.
//!
//! # Wire format
//!
//! ```text
//! [u32 num_bits][u32 num_hashes][bit array, (num_bits+7)/8 bytes]
//! ```

use thiserror::Error;

/// Bloom section decode failures.
#[derive(Debug, Error)]
pub enum BloomError {
    /// The serialized section does not match its own header.
    #[error("malformed bloom filter: {0}")]
    Malformed(String),
}

/// A fixed-size bloom filter over key hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u32,
    num_hashes: u32,
}

impl BloomFilter {
    /// Builds an empty filter sized for `expected_entries` keys at the
    /// given false-positive rate.
    ///
    /// Standard sizing: `m = -n·ln(p) / ln(2)²` bits and `k = (m/n)·ln(2)`
    /// hash probes, floored to sane minimums.
    pub fn new(expected_entries: usize, false_positive_rate: f64) -> Self {
        let n = expected_entries.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-n * false_positive_rate.ln() / (ln2 * ln2)).ceil();
        let num_bits = (m as u32).max(64);
        let num_bytes = num_bits.div_ceil(8) as usize;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 30.0) as u32;

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: num_bytes as u32 * 8,
            num_hashes,
        }
    }

    /// Base hash for a key; all probe positions derive from this value.
    pub fn key_hash(key: &[u8]) -> u32 {
        farmhash::fingerprint32(key)
    }

    /// Inserts a key.
    pub fn add(&mut self, key: &[u8]) {
        let mut h = Self::key_hash(key);
        let delta = h.rotate_left(15);
        for _ in 0..self.num_hashes {
            let bit = h % self.num_bits;
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
            h = h.wrapping_add(delta);
        }
    }

    /// Whether the filter may contain `key`. `false` is definitive.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let mut h = Self::key_hash(key);
        let delta = h.rotate_left(15);
        for _ in 0..self.num_hashes {
            let bit = h % self.num_bits;
            if self.bits[(bit / 8) as usize] & (1 << (bit % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }

    /// Serializes to `u32 num_bits | u32 num_hashes | bit array`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.bits.len());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.bits);
        buf
    }

    /// Reverses [`BloomFilter::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, BloomError> {
        if bytes.len() < 8 {
            return Err(BloomError::Malformed(
                "bloom section shorter than its header".to_string(),
            ));
        }
        let num_bits = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let num_hashes = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let expected_bytes = num_bits.div_ceil(8) as usize;
        if bytes.len() - 8 != expected_bytes {
            return Err(BloomError::Malformed(format!(
                "bloom bit array is {} bytes, header says {}",
                bytes.len() - 8,
                expected_bytes
            )));
        }
        if num_bits == 0 || num_hashes == 0 || num_hashes > 30 {
            return Err(BloomError::Malformed(format!(
                "implausible bloom header: {num_bits} bits, {num_hashes} hashes"
            )));
        }
        Ok(Self {
            bits: bytes[8..].to_vec(),
            num_bits,
            num_hashes,
        })
    }

    /// Size of `encode()`'s output.
    pub fn encoded_size(&self) -> usize {
        8 + self.bits.len()
    }
}

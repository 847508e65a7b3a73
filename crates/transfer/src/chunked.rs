use std::ops::Range;

use sha2::{Digest, Sha256};
use uplink_protocol::UploadConfig;

/// A contiguous byte range of a file sent as one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// Zero-based position in the chunk sequence.
    pub index: usize,
    /// Byte offset within the file.
    pub offset: u64,
    /// Length of this chunk in bytes.
    pub len: u64,
}

impl Chunk {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<u64> {
        self.offset..self.end()
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Number of chunks needed for `file_size` bytes: `ceil(file_size / chunk_size)`.
///
/// A `chunk_size` of zero is treated as one byte to keep the plan finite.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> usize {
    let chunk_size = chunk_size.max(1);
    file_size.div_ceil(chunk_size) as usize
}

/// Boundaries of chunk `index`, or `None` past the end of the file.
pub fn chunk_at(file_size: u64, chunk_size: u64, index: usize) -> Option<Chunk> {
    let chunk_size = chunk_size.max(1);
    let offset = (index as u64).checked_mul(chunk_size)?;
    if offset >= file_size {
        return None;
    }
    let len = chunk_size.min(file_size - offset);
    Some(Chunk { index, offset, len })
}

/// Partitions `[0, file_size)` into ordered chunks of `chunk_size` bytes.
///
/// Every chunk but the last is exactly `chunk_size` long; the last one
/// holds the remainder. An empty file yields no chunks.
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Vec<Chunk> {
    (0..chunk_count(file_size, chunk_size))
        .filter_map(|index| chunk_at(file_size, chunk_size, index))
        .collect()
}

/// Bytes covered by the first `confirmed` chunks.
pub fn confirmed_bytes(file_size: u64, chunk_size: u64, confirmed: usize) -> u64 {
    let chunk_size = chunk_size.max(1);
    (confirmed as u64).saturating_mul(chunk_size).min(file_size)
}

/// Whether a file of `file_size` bytes goes through the chunked path.
///
/// `config.chunked` overrides the threshold rule when set.
pub fn should_use_chunked_upload(file_size: u64, config: &UploadConfig) -> bool {
    match config.chunked {
        Some(forced) => forced,
        None => file_size > config.chunk_threshold,
    }
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

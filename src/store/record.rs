//! Chained record format
//!
//! ## Record Layout (little endian)
//! ```text
//! ┌──────────┬────────────┬────────────┬───────────┬─────┬───────┐
//! │ Prev (8) │ KeyLen (4) │ ValLen (4) │ CRC32 (4) │ Key │ Value │
//! └──────────┴────────────┴────────────┴───────────┴─────┴───────┘
//! ```
//! - `Prev`: offset of the previous record for the same key (0 = none)
//! - `ValLen == 0` marks a tombstone
//! - CRC covers Prev, KeyLen, ValLen, Key and Value

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{KvError, Result};

/// Header size: Prev (8) + KeyLen (4) + ValLen (4) + CRC (4) = 20 bytes
pub const RECORD_HEADER_SIZE: usize = 20;

/// Link value meaning "no previous record"
pub const NULL_OFFSET: u64 = 0;

/// Longest accepted key (bytes)
pub const MAX_KEY_LEN: usize = 4096;

/// Longest accepted value (16 MB)
pub const MAX_VALUE_LEN: usize = 16 * 1024 * 1024;

/// Fixed-size record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub prev: u64,
    pub key_len: u32,
    pub val_len: u32,
    pub crc: u32,
}

impl RecordHeader {
    pub fn decode(bytes: &[u8; RECORD_HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        Self {
            prev: buf.get_u64_le(),
            key_len: buf.get_u32_le(),
            val_len: buf.get_u32_le(),
            crc: buf.get_u32_le(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.val_len == 0
    }

    /// Total encoded size of the record
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.key_len as u64 + self.val_len as u64
    }

    /// Whether `key`/`value` are the bytes this header was written for
    pub fn verify(&self, key: &[u8], value: &[u8]) -> bool {
        key.len() == self.key_len as usize
            && value.len() == self.val_len as usize
            && checksum(self.prev, key, value) == self.crc
    }
}

/// A fully decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Logical offset the record was read from
    pub offset: u64,
    pub header: RecordHeader,
    pub key: Vec<u8>,
    /// `None` for a tombstone
    pub value: Option<Vec<u8>>,
}

/// Encode a record; `value == None` encodes a tombstone
pub fn encode_record(prev: u64, key: &[u8], value: Option<&[u8]>) -> Bytes {
    let value = value.unwrap_or_default();
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_SIZE + key.len() + value.len());

    buf.put_u64_le(prev);
    buf.put_u32_le(key.len() as u32);
    buf.put_u32_le(value.len() as u32);
    buf.put_u32_le(checksum(prev, key, value));
    buf.put_slice(key);
    buf.put_slice(value);

    buf.freeze()
}

fn checksum(prev: u64, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&prev.to_le_bytes());
    hasher.update(&(key.len() as u32).to_le_bytes());
    hasher.update(&(value.len() as u32).to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

// =============================================================================
// Argument Validation
// =============================================================================

pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(KvError::InvalidArgument(format!(
            "key length must be 1..={}, got {}",
            MAX_KEY_LEN,
            key.len()
        )));
    }
    Ok(())
}

/// Empty values are reserved for tombstones
pub fn validate_value(value: &[u8]) -> Result<()> {
    if value.is_empty() || value.len() > MAX_VALUE_LEN {
        return Err(KvError::InvalidArgument(format!(
            "value length must be 1..={}, got {}",
            MAX_VALUE_LEN,
            value.len()
        )));
    }
    Ok(())
}

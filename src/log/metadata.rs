//! Log metadata
//!
//! Persisted in block 0 of the device.
//!
//! ## Block Format
//! ```text
//! ┌──────────────┬──────────────────────────────┬───────────┬─────────┐
//! │ BodyLen (4)  │ Body (bincode)               │ CRC32 (4) │ zeroes  │
//! │              │ tag | cursor | index region  │           │         │
//! └──────────────┴──────────────────────────────┴───────────┴─────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::device::BlockDevice;
use crate::error::{KvError, Result};

use super::Region;

/// Blocks at the start of the device that never hold log data
pub const RESERVED_BLOCKS: u64 = 1;

/// Tag identifying an initialized log
pub(crate) const METADATA_TAG: [u8; 6] = *b"CHNKV\0";

/// Write cursor and index location of a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    tag: [u8; 6],
    /// Device block holding the next byte to append
    pub current_block: u64,
    /// Offset of the next byte to append within `current_block`
    pub current_offset: u64,
    /// Where the serialized index checkpoint lives (logical log addresses)
    pub index: Region,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

impl Metadata {
    /// Metadata for an empty log; the first append lands in block 1
    pub fn new() -> Self {
        Self {
            tag: METADATA_TAG,
            current_block: RESERVED_BLOCKS,
            current_offset: 0,
            index: Region::default(),
        }
    }

    /// Logical length of the log described by the write cursor
    pub fn log_len(&self, block_size: u64) -> u64 {
        (self.current_block - RESERVED_BLOCKS) * block_size + self.current_offset
    }

    /// Encode into a zero padded block
    pub fn encode(&self, block_size: usize) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let needed = 4 + body.len() + 4;
        if needed > block_size {
            return Err(KvError::Config(format!(
                "metadata needs {} bytes, block size is {}",
                needed, block_size
            )));
        }

        let crc = crc32fast::hash(&body);
        let mut page = vec![0u8; block_size];
        page[0..4].copy_from_slice(&(body.len() as u32).to_le_bytes());
        page[4..4 + body.len()].copy_from_slice(&body);
        page[4 + body.len()..needed].copy_from_slice(&crc.to_le_bytes());
        Ok(page)
    }

    /// Decode a metadata block, returning `None` if it is not a valid one
    pub fn decode(page: &[u8]) -> Option<Self> {
        let len_bytes: [u8; 4] = page.get(0..4)?.try_into().ok()?;
        let body_len = u32::from_le_bytes(len_bytes) as usize;
        let body = page.get(4..4 + body_len)?;
        let crc_bytes: [u8; 4] = page.get(4 + body_len..8 + body_len)?.try_into().ok()?;
        if crc32fast::hash(body) != u32::from_le_bytes(crc_bytes) {
            return None;
        }

        let meta: Metadata = bincode::deserialize(body).ok()?;
        let block_size = page.len() as u64;
        let valid = meta.tag == METADATA_TAG
            && meta.current_block >= RESERVED_BLOCKS
            && meta.current_offset < block_size
            && meta.index.end() <= meta.log_len(block_size);
        valid.then_some(meta)
    }

    /// Load metadata from block 0, reinitializing it if the block is not valid
    pub fn load(device: &dyn BlockDevice) -> Result<Self> {
        let block_size = device.block_size() as usize;
        let mut page = vec![0u8; block_size];
        device.read(0, &mut page)?;

        let meta = match Self::decode(&page) {
            Some(meta) => meta,
            None => {
                tracing::warn!("Metadata block is corrupt or uninitialized, starting a new log");
                Self::new()
            }
        };

        tracing::debug!(
            "Loaded metadata: cursor=({}, {}), index=({}, {})",
            meta.current_block,
            meta.current_offset,
            meta.index.address,
            meta.index.size
        );
        Ok(meta)
    }

    /// Write metadata to block 0
    pub fn save(&self, device: &dyn BlockDevice) -> Result<()> {
        let page = self.encode(device.block_size() as usize)?;
        device.write(0, &page)?;
        Ok(())
    }
}

//! Index
//!
//! In-memory map from key to the offset of its newest record.
//!
//! ## Serialized Format
//! ```text
//! ┌──────────────────────────────────────────┬───────────┐
//! │ IndexImage (bincode)                     │ CRC32 (4) │
//! │ version | [(key, offset), ...] by key    │           │
//! └──────────────────────────────────────────┴───────────┘
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{KvError, Result};

use super::record::NULL_OFFSET;

/// Current index image version
const INDEX_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct IndexImage {
    version: u16,
    entries: Vec<(Vec<u8>, u64)>,
}

/// Key → chain head offset
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Index {
    cells: HashMap<Vec<u8>, u64>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell for `key`, created holding `NULL_OFFSET` if absent.
    ///
    /// The cell stays put for as long as the returned borrow lives.
    pub fn update(&mut self, key: &[u8]) -> &mut u64 {
        self.cells.entry(key.to_vec()).or_insert(NULL_OFFSET)
    }

    /// Cell for `key`, if it has ever been updated
    pub fn lookup(&self, key: &[u8]) -> Option<&u64> {
        self.cells.get(key)
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], u64)> + '_ {
        self.cells.iter().map(|(key, offset)| (key.as_slice(), *offset))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut entries: Vec<(Vec<u8>, u64)> = self
            .cells
            .iter()
            .map(|(key, offset)| (key.clone(), *offset))
            .collect();
        entries.sort_unstable();

        let image = IndexImage {
            version: INDEX_VERSION,
            entries,
        };
        let mut bytes = bincode::serialize(&image)?;
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(KvError::Corruption(format!(
                "index image too short ({} bytes)",
                bytes.len()
            )));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32fast::hash(body) != expected {
            return Err(KvError::Corruption("index image checksum mismatch".to_string()));
        }

        let image: IndexImage = bincode::deserialize(body)?;
        if image.version != INDEX_VERSION {
            return Err(KvError::Corruption(format!(
                "unsupported index version: {}",
                image.version
            )));
        }

        Ok(Self {
            cells: image.entries.into_iter().collect(),
        })
    }
}

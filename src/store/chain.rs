//! Chained Record Store
//!
//! Appends key-value records to the log and resolves keys by walking the
//! per-key chain backwards from an index-supplied head offset.

use crate::error::{KvError, Result};
use crate::log::{AppendLog, Region};

use super::record::{
    encode_record, validate_key, validate_value, Record, RecordHeader, NULL_OFFSET,
    RECORD_HEADER_SIZE,
};

/// Written at logical offset 0 of every log so no record starts at the null link
const LOG_PREAMBLE: &[u8; 8] = b"CHAINKV1";

/// Keys up to this length are compared from a stack buffer
const KEY_SCRATCH: usize = 256;

/// Most recent record for a key found by a chain walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHit {
    /// Logical offset of the matched record
    pub offset: u64,
    /// `None` if the matched record is a tombstone
    pub value: Option<Vec<u8>>,
}

/// Key-value records on an append log
pub struct ChainStore {
    log: AppendLog,
}

impl ChainStore {
    /// Wrap a log, writing the preamble if it is empty
    pub fn open(log: AppendLog) -> Result<Self> {
        if log.is_empty() {
            log.append(LOG_PREAMBLE)?;
        } else {
            let mut preamble = [0u8; 8];
            log.read(0, &mut preamble)?;
            if &preamble != LOG_PREAMBLE {
                return Err(KvError::Corruption(
                    "log does not start with a record store preamble".to_string(),
                ));
            }
        }
        Ok(Self { log })
    }

    /// Append a record linked to `prev`; `value == None` appends a tombstone
    pub fn append_record(&self, key: &[u8], value: Option<&[u8]>, prev: u64) -> Result<u64> {
        validate_key(key)?;
        if let Some(value) = value {
            validate_value(value)?;
        }
        let record = encode_record(prev, key, value);
        let offset = self.log.append(&record)?;
        tracing::trace!(
            "Appended {} record at {} (prev {})",
            if value.is_some() { "value" } else { "tombstone" },
            offset,
            prev
        );
        Ok(offset)
    }

    /// Walk the chain starting at `start` to the newest record for `key`
    pub fn lookup_chain(&self, key: &[u8], start: u64) -> Result<Option<ChainHit>> {
        let mut scratch = [0u8; KEY_SCRATCH];
        let mut offset = start;

        while offset != NULL_OFFSET {
            let header = self.read_header(offset)?;

            if header.key_len as usize == key.len() {
                let key_at = offset + RECORD_HEADER_SIZE as u64;
                let matched = if key.len() <= KEY_SCRATCH {
                    let candidate = &mut scratch[..key.len()];
                    self.log.read(key_at, candidate)?;
                    candidate == key
                } else {
                    let candidate = self.log.read_vec(key_at, key.len())?;
                    candidate == key
                };

                if matched {
                    let value = self.read_value(offset, &header, key)?;
                    return Ok(Some(ChainHit { offset, value }));
                }
            }

            offset = Self::follow(offset, &header)?;
        }

        Ok(None)
    }

    /// Decode the whole record at `offset`
    pub fn read_record(&self, offset: u64) -> Result<Record> {
        let header = self.read_header(offset)?;
        let key = self
            .log
            .read_vec(offset + RECORD_HEADER_SIZE as u64, header.key_len as usize)?;
        let value = self.read_value(offset, &header, &key)?;
        Ok(Record {
            offset,
            header,
            key,
            value,
        })
    }

    /// Every record for `key` reachable from `head`, newest first
    pub fn versions(&self, key: &[u8], head: u64) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut offset = head;

        while offset != NULL_OFFSET {
            let record = self.read_record(offset)?;
            offset = Self::follow(offset, &record.header)?;
            if record.key == key {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Append opaque bytes (index checkpoints) outside the record format
    pub fn append_blob(&self, bytes: &[u8]) -> Result<Region> {
        let offset = self.log.append(bytes)?;
        Ok(Region::new(offset, bytes.len() as u64))
    }

    pub fn read_blob(&self, region: Region) -> Result<Vec<u8>> {
        self.log.read_vec(region.address, region.size as usize)
    }

    pub fn log(&self) -> &AppendLog {
        &self.log
    }

    pub fn close(self) -> Result<()> {
        self.log.close()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read_header(&self, offset: u64) -> Result<RecordHeader> {
        let mut bytes = [0u8; RECORD_HEADER_SIZE];
        self.log.read(offset, &mut bytes)?;
        Ok(RecordHeader::decode(&bytes))
    }

    /// Read and checksum the value of a record whose key is `key`
    fn read_value(&self, offset: u64, header: &RecordHeader, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value_at = offset + RECORD_HEADER_SIZE as u64 + header.key_len as u64;
        let value = self.log.read_vec(value_at, header.val_len as usize)?;

        if !header.verify(key, &value) {
            return Err(KvError::Corruption(format!(
                "record checksum mismatch at offset {}",
                offset
            )));
        }
        Ok((!header.is_tombstone()).then_some(value))
    }

    /// Next offset in the chain; links must point strictly backwards
    fn follow(offset: u64, header: &RecordHeader) -> Result<u64> {
        if header.prev >= offset {
            return Err(KvError::Corruption(format!(
                "record at {} links forward to {}",
                offset, header.prev
            )));
        }
        Ok(header.prev)
    }
}

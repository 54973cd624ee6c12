//! Append Log
//!
//! One logical append-only byte stream over write buffer + read cache +
//! metadata. Logical offset 0 is the first byte of device block
//! `RESERVED_BLOCKS`.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{validate_block_size, Config};
use crate::device::BlockDevice;
use crate::error::{KvError, Result};

use super::metadata::{Metadata, RESERVED_BLOCKS};
use super::read_cache::{CacheStats, ReadCache};
use super::write_buffer::WriteBuffer;
use super::Region;

/// Where the bytes of a read come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadPlan {
    /// Entirely below the flushed boundary
    Cache(Region),
    /// Entirely inside the write buffer
    Buffer(Region),
    /// Straddles the boundary: `disk` ends where `buffered` starts
    Split { disk: Region, buffered: Region },
}

impl ReadPlan {
    /// Classify a physical region against the buffer's `[boundary, end)`.
    ///
    /// Returns `None` if the region runs past `end`.
    pub(crate) fn classify(region: Region, boundary: u64, end: u64) -> Option<Self> {
        if region.end() > end {
            return None;
        }
        if region.end() <= boundary {
            return Some(ReadPlan::Cache(region));
        }
        if region.address >= boundary {
            return Some(ReadPlan::Buffer(region));
        }

        let buffered = Region::new(boundary, region.end() - boundary);
        let disk = Region::new(region.address, region.size - buffered.size);
        assert_eq!(disk.size + buffered.size, region.size);
        Some(ReadPlan::Split { disk, buffered })
    }
}

/// Append-only log on a block device
pub struct AppendLog {
    device: Arc<dyn BlockDevice>,
    block_size: u64,
    buffer: WriteBuffer,
    cache: ReadCache,
    meta: Mutex<Metadata>,
}

impl AppendLog {
    /// Open the log on `device`.
    ///
    /// With persistence the write cursor and index region are loaded from
    /// block 0; otherwise the log starts empty.
    pub fn open(device: Arc<dyn BlockDevice>, config: &Config) -> Result<Self> {
        validate_block_size(device.block_size())?;
        let block_size = device.block_size() as u64;
        if device.size() < (RESERVED_BLOCKS + 1) * block_size {
            return Err(KvError::Config(format!(
                "device of {} bytes cannot hold metadata and log blocks",
                device.size()
            )));
        }

        let meta = if config.persistence {
            Metadata::load(&*device)?
        } else {
            Metadata::new()
        };
        if meta.current_block * block_size + meta.current_offset > device.size() {
            return Err(KvError::Corruption(format!(
                "write cursor ({}, {}) lies outside the device",
                meta.current_block, meta.current_offset
            )));
        }

        let buffer = WriteBuffer::open(
            Arc::clone(&device),
            config.write_buffer_blocks,
            config.flush_interval(),
            meta.current_block,
            meta.current_offset,
        )?;
        let cache = ReadCache::new(Arc::clone(&device), config.read_cache_blocks)?;

        tracing::info!(
            "Opened log: {} bytes, block size {}, persistence {}",
            meta.log_len(block_size),
            block_size,
            config.persistence
        );

        Ok(Self {
            device,
            block_size,
            buffer,
            cache,
            meta: Mutex::new(meta),
        })
    }

    /// Append bytes at the end of the log, returning their logical offset
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        let needed = self.buffer.end() + data.len() as u64;
        if needed > self.device.size() {
            return Err(KvError::DeviceFull {
                needed,
                capacity: self.device.size(),
            });
        }

        self.cache.invalidate(self.buffer.current_block());
        let physical = self.buffer.append(data)?;
        Ok(physical - self.reserved_bytes())
    }

    /// Read `out.len()` bytes at logical `offset`
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        let len = out.len() as u64;
        let out_of_bounds = || KvError::OutOfBounds {
            offset,
            len,
            end: self.len(),
        };
        let address = offset
            .checked_add(self.reserved_bytes())
            .ok_or_else(out_of_bounds)?;
        let region = Region::new(address, len);
        if region.address.checked_add(len).is_none() {
            return Err(out_of_bounds());
        }

        let view = self.buffer.view();
        let plan = ReadPlan::classify(region, view.boundary(), view.end());

        match plan {
            None => {
                drop(view);
                Err(out_of_bounds())
            }
            Some(ReadPlan::Cache(disk)) => {
                drop(view);
                self.cache.read(disk, out)
            }
            Some(ReadPlan::Buffer(buffered)) => {
                view.read(buffered, out);
                Ok(())
            }
            Some(ReadPlan::Split { disk, buffered }) => {
                tracing::trace!("Split read at {} ({} bytes)", offset, len);
                let (disk_out, buffered_out) = out.split_at_mut(disk.size as usize);
                view.read(buffered, buffered_out);
                drop(view);
                self.cache.read(disk, disk_out)
            }
        }
    }

    /// Read `len` bytes at logical `offset` into a new vector
    pub fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read(offset, &mut out)?;
        Ok(out)
    }

    /// Drain the write buffer; `partial` also writes the trailing partial block
    pub fn flush(&self, partial: bool) -> Result<()> {
        self.buffer.flush(partial)
    }

    /// Persist the cursor and index region, then stop the write buffer
    pub fn close(mut self) -> Result<()> {
        self.buffer.shutdown()?;

        let (current_block, current_offset) = self.buffer.cursor();
        let meta = {
            let mut meta = self.meta.lock();
            meta.current_block = current_block;
            meta.current_offset = current_offset;
            *meta
        };
        meta.save(&*self.device)?;
        self.device.sync()?;

        tracing::info!(
            "Closed log: {} bytes, index at ({}, {})",
            meta.log_len(self.block_size),
            meta.index.address,
            meta.index.size
        );
        Ok(())
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Logical length of the log
    pub fn len(&self) -> u64 {
        self.buffer.end() - self.reserved_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Logical region of the last saved index checkpoint
    pub fn index_region(&self) -> Region {
        self.meta.lock().index
    }

    /// Record where the index checkpoint lives; persisted on close
    pub fn set_index_region(&self, region: Region) {
        tracing::debug!("Index region set to ({}, {})", region.address, region.size);
        self.meta.lock().index = region;
    }

    /// Metadata as it would be saved now
    pub fn metadata(&self) -> Metadata {
        let (current_block, current_offset) = self.buffer.cursor();
        let mut meta = *self.meta.lock();
        meta.current_block = current_block;
        meta.current_offset = current_offset;
        meta
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn reserved_bytes(&self) -> u64 {
        RESERVED_BLOCKS * self.block_size
    }
}

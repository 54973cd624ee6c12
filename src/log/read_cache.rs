//! Read Cache
//!
//! Fixed number of block-sized slots holding already-flushed device blocks.
//!
//! ## Eviction
//! First free slot wins; with no free slot, the slot under a round-robin
//! eviction cursor is replaced.
//!
//! TODO: second-chance or LRU eviction; round robin evicts hot blocks as
//! readily as cold ones.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::device::BlockDevice;
use crate::error::{KvError, Result};

use super::Region;

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub slots: usize,
    pub occupied: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CacheState {
    /// `slots.len()` pages laid out back to back
    pages: Box<[u8]>,
    /// Device block held by each slot
    slots: Vec<Option<u64>>,
    /// Block number → slot
    lookup: HashMap<u64, usize>,
    eviction_cursor: usize,
    hits: u64,
    misses: u64,
}

impl CacheState {
    /// Slot holding `block_no`, reading it from the device on a miss
    fn locate(&mut self, device: &dyn BlockDevice, block_size: usize, block_no: u64) -> Result<usize> {
        if let Some(&slot) = self.lookup.get(&block_no) {
            self.hits += 1;
            return Ok(slot);
        }
        self.misses += 1;

        let slot = self.victim();
        if let Some(evicted) = self.slots[slot].take() {
            self.lookup.remove(&evicted);
            tracing::trace!("Evicting block {} from slot {}", evicted, slot);
        }

        // The slot stays empty if the read fails
        let page = &mut self.pages[slot * block_size..(slot + 1) * block_size];
        device.read(block_no * block_size as u64, page)?;

        self.slots[slot] = Some(block_no);
        self.lookup.insert(block_no, slot);
        Ok(slot)
    }

    fn victim(&mut self) -> usize {
        if let Some(free) = self.slots.iter().position(Option::is_none) {
            return free;
        }
        let slot = self.eviction_cursor;
        self.eviction_cursor = (self.eviction_cursor + 1) % self.slots.len();
        slot
    }
}

/// Block cache in front of the device for already-flushed log data
pub struct ReadCache {
    device: Arc<dyn BlockDevice>,
    block_size: usize,
    state: Mutex<CacheState>,
}

impl ReadCache {
    pub fn new(device: Arc<dyn BlockDevice>, slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(KvError::Config("read cache needs at least one block".to_string()));
        }
        let block_size = device.block_size() as usize;

        Ok(Self {
            device,
            block_size,
            state: Mutex::new(CacheState {
                pages: vec![0u8; block_size * slots].into_boxed_slice(),
                slots: vec![None; slots],
                lookup: HashMap::with_capacity(slots),
                eviction_cursor: 0,
                hits: 0,
                misses: 0,
            }),
        })
    }

    /// Contents of device block `block_no`.
    ///
    /// The page is only reachable through the returned guard, which holds
    /// the cache lock.
    pub fn get_page(&self, block_no: u64) -> Result<MappedMutexGuard<'_, [u8]>> {
        let block_size = self.block_size;
        let mut state = self.state.lock();
        let slot = state.locate(&*self.device, block_size, block_no)?;
        Ok(MutexGuard::map(state, move |s| {
            &mut s.pages[slot * block_size..(slot + 1) * block_size]
        }))
    }

    /// Copy a region of physical addresses into `out`, page by page
    pub fn read(&self, region: Region, out: &mut [u8]) -> Result<()> {
        let block_size = self.block_size as u64;
        let mut state = self.state.lock();

        let mut block_no = region.address / block_size;
        let mut page_offset = (region.address % block_size) as usize;
        let mut copied = 0usize;
        let total = region.size as usize;

        while copied < total {
            let slot = state.locate(&*self.device, self.block_size, block_no)?;
            let len = (total - copied).min(self.block_size - page_offset);
            let start = slot * self.block_size + page_offset;
            out[copied..copied + len].copy_from_slice(&state.pages[start..start + len]);

            copied += len;
            page_offset = 0;
            block_no += 1;
        }

        assert_eq!(copied, total);
        Ok(())
    }

    /// Forget any cached copy of `block_no`
    pub fn invalidate(&self, block_no: u64) {
        let mut state = self.state.lock();
        if let Some(slot) = state.lookup.remove(&block_no) {
            state.slots[slot] = None;
        }
    }

    /// Whether `block_no` is currently cached
    pub fn contains(&self, block_no: u64) -> bool {
        self.state.lock().lookup.contains_key(&block_no)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            slots: state.slots.len(),
            occupied: state.lookup.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}

//! Write Buffer
//!
//! Stages appended bytes in a circular buffer and drains whole blocks to the
//! device from a background flush worker.
//!
//! ## Concurrency
//! - `state`: one mutex over the ring, the flushed-block cursor, and the fault
//! - `space_available`: condvar appenders wait on when the ring is full
//! - `data_available`: bounded(1) channel that wakes the flush worker;
//!   signals coalesce, and `recv_timeout` gives the periodic flush
//!
//! Device writes happen with `state` held, so a block leaves the buffer only
//! once it is on the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::device::BlockDevice;
use crate::error::{KvError, Result};

use super::ring::Ring;
use super::Region;

/// A failed flush that has not been retried successfully
struct Fault {
    message: String,
    /// The failed flush included the trailing partial block
    partial: bool,
}

/// Mutable state behind the buffer mutex
struct BufferState {
    ring: Ring,
    /// Device block corresponding to the ring's write head
    current_block: u64,
    /// Linear page for blocks that straddle the wrap point
    scratch: Box<[u8]>,
    /// Last flush failure, cleared by the next successful flush of the same kind
    fault: Option<Fault>,
    /// Whole blocks written since open
    flushed_blocks: u64,
}

impl BufferState {
    /// Physical address of the first byte still held in the ring
    fn boundary(&self, block_size: usize) -> u64 {
        self.current_block * block_size as u64
    }

    /// Physical address one past the last appended byte
    fn end(&self, block_size: usize) -> u64 {
        self.boundary(block_size) + self.ring.used() as u64
    }
}

/// State shared with the flush worker
struct Shared {
    device: Arc<dyn BlockDevice>,
    block_size: usize,
    state: Mutex<BufferState>,
    space_available: Condvar,
    data_available: Sender<()>,
    shutdown: AtomicBool,
}

impl Shared {
    // =========================================================================
    // Backpressure monitor
    // =========================================================================

    /// Whether `len` bytes fit without waiting
    fn try_reserve(state: &BufferState, len: usize) -> bool {
        state.ring.free() >= len
    }

    /// Block until `len` bytes are free, waking the flush worker while waiting
    fn wait_for_space(&self, state: &mut MutexGuard<'_, BufferState>, len: usize) -> Result<()> {
        while !Self::try_reserve(state, len) {
            if let Some(fault) = &state.fault {
                return Err(KvError::Flush(fault.message.clone()));
            }
            if self.shutdown.load(Ordering::Acquire) {
                return Err(KvError::Closed);
            }
            self.signal_data();
            tracing::trace!("Waiting for write buffer space ({} bytes)", len);
            self.space_available.wait(state);
        }
        Ok(())
    }

    /// Copy reserved bytes in, waking the worker once a whole block is staged
    fn commit(&self, state: &mut BufferState, data: &[u8]) {
        state.ring.push(data);
        if state.ring.used() >= self.block_size {
            self.signal_data();
        }
    }

    /// Wait for a data signal or the periodic timeout; false once disconnected
    fn wait_for_data(wake: &Receiver<()>, timeout: Duration) -> bool {
        !matches!(wake.recv_timeout(timeout), Err(RecvTimeoutError::Disconnected))
    }

    fn signal_data(&self) {
        // A pending signal already guarantees a flush
        let _ = self.data_available.try_send(());
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    fn flush(&self, partial: bool) -> Result<()> {
        let mut state = self.state.lock();
        let result = self.drain(&mut state, partial);

        match &result {
            Ok(written) => {
                if *written > 0 {
                    tracing::debug!("Flushed {} block(s), next block {}", written, state.current_block);
                }
                // A full-blocks-only flush says nothing about a failed partial block
                let cleared = partial || state.fault.as_ref().map_or(false, |f| !f.partial);
                if cleared && state.fault.take().is_some() {
                    tracing::info!("Write buffer recovered from flush fault");
                }
            }
            Err(e) => {
                let partial = partial || state.fault.as_ref().map_or(false, |f| f.partial);
                state.fault = Some(Fault {
                    message: e.to_string(),
                    partial,
                });
            }
        }
        drop(state);

        self.space_available.notify_all();
        result.map(|_| ())
    }

    /// Write every full block, then optionally the trailing partial block.
    ///
    /// The partial block stays in the ring: it is rewritten once it fills.
    fn drain(&self, state: &mut BufferState, partial: bool) -> Result<u64> {
        let block_size = self.block_size;
        let mut written = 0;

        while state.ring.used() >= block_size {
            let address = state.boundary(block_size);
            let (head, tail) = state.ring.front(block_size);
            if tail.is_empty() {
                self.device.write(address, head)?;
            } else {
                state.scratch[..head.len()].copy_from_slice(head);
                state.scratch[head.len()..].copy_from_slice(tail);
                self.device.write(address, &state.scratch)?;
            }
            state.ring.consume(block_size);
            state.current_block += 1;
            state.flushed_blocks += 1;
            written += 1;
        }

        let used = state.ring.used();
        if partial && used > 0 {
            let address = state.boundary(block_size);
            let BufferState { ring, scratch, .. } = state;
            scratch.fill(0);
            ring.copy_out(0, &mut scratch[..used]);
            self.device.write(address, &scratch[..])?;
            written += 1;
        }

        Ok(written)
    }
}

/// Read-only view of the buffer taken under its lock.
///
/// Holding the view keeps the flush worker from moving the boundary.
pub struct BufferView<'a> {
    state: MutexGuard<'a, BufferState>,
    block_size: usize,
}

impl BufferView<'_> {
    /// Physical address of the first byte not yet flushed
    pub fn boundary(&self) -> u64 {
        self.state.boundary(self.block_size)
    }

    /// Physical address one past the last appended byte
    pub fn end(&self) -> u64 {
        self.state.end(self.block_size)
    }

    /// Copy a region still resident in the buffer; false if it is not
    pub fn read(&self, region: Region, out: &mut [u8]) -> bool {
        if region.address < self.boundary() || region.end() > self.end() {
            return false;
        }
        let skip = (region.address - self.boundary()) as usize;
        self.state.ring.copy_out(skip, &mut out[..region.size as usize]);
        true
    }
}

/// Circular staging buffer with a background flush worker
pub struct WriteBuffer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl WriteBuffer {
    /// Create the buffer with its write cursor at `(current_block, current_offset)`.
    ///
    /// A partially written block is read back so appends continue inside it.
    pub fn open(
        device: Arc<dyn BlockDevice>,
        capacity_blocks: usize,
        flush_interval: Duration,
        current_block: u64,
        current_offset: u64,
    ) -> Result<Self> {
        if capacity_blocks == 0 {
            return Err(KvError::Config("write buffer needs at least one block".to_string()));
        }
        let block_size = device.block_size() as usize;
        let mut ring = Ring::new(block_size * capacity_blocks);

        if current_offset > 0 {
            let mut page = vec![0u8; block_size];
            device.read(current_block * block_size as u64, &mut page)?;
            ring.push(&page[..current_offset as usize]);
        }

        let (wake_tx, wake_rx) = channel::bounded(1);
        let shared = Arc::new(Shared {
            device,
            block_size,
            state: Mutex::new(BufferState {
                ring,
                current_block,
                scratch: vec![0u8; block_size].into_boxed_slice(),
                fault: None,
                flushed_blocks: 0,
            }),
            space_available: Condvar::new(),
            data_available: wake_tx,
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("chainkv-flush".to_string())
            .spawn(move || flush_worker(worker_shared, wake_rx, flush_interval))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Append bytes, blocking while the buffer lacks space.
    ///
    /// Returns the physical address of the first appended byte.
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        let shared = &*self.shared;
        let mut state = shared.state.lock();

        if shared.shutdown.load(Ordering::Acquire) {
            return Err(KvError::Closed);
        }
        if let Some(fault) = &state.fault {
            return Err(KvError::Flush(fault.message.clone()));
        }

        let address = state.end(shared.block_size);
        // Anything that fits beside a partial block goes in whole; larger
        // appends stream through, since waiting for all of it could deadlock
        let whole_limit = state.ring.capacity() - shared.block_size;

        let mut rest = data;
        while !rest.is_empty() {
            let want = if rest.len() <= whole_limit { rest.len() } else { 1 };
            shared.wait_for_space(&mut state, want)?;
            let take = rest.len().min(state.ring.free());
            shared.commit(&mut state, &rest[..take]);
            rest = &rest[take..];
        }

        Ok(address)
    }

    /// Lock the buffer for read planning
    pub fn view(&self) -> BufferView<'_> {
        BufferView {
            state: self.shared.state.lock(),
            block_size: self.shared.block_size,
        }
    }

    /// Copy a region still resident in the buffer; false if it is not
    pub fn read(&self, region: Region, out: &mut [u8]) -> bool {
        self.view().read(region, out)
    }

    /// Drain full blocks to the device, plus the trailing partial block if asked
    pub fn flush(&self, partial: bool) -> Result<()> {
        self.shared.flush(partial)
    }

    /// Stop the flush worker and write everything that is left
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            self.shared.shutdown.store(true, Ordering::Release);
            self.shared.signal_data();
            self.shared.space_available.notify_all();
            if worker.join().is_err() {
                return Err(KvError::Flush("flush worker panicked".to_string()));
            }
        }
        self.shared.flush(true)
    }

    /// Whether the flush worker is still running
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().ring.capacity()
    }

    /// Bytes appended but not yet drained as whole blocks
    pub fn used(&self) -> usize {
        self.shared.state.lock().ring.used()
    }

    /// Device block corresponding to the oldest buffered byte
    pub fn current_block(&self) -> u64 {
        self.shared.state.lock().current_block
    }

    /// Physical address one past the last appended byte
    pub fn end(&self) -> u64 {
        self.shared.state.lock().end(self.shared.block_size)
    }

    /// Write cursor as `(block, offset within block)`
    pub fn cursor(&self) -> (u64, u64) {
        let state = self.shared.state.lock();
        let block_size = self.shared.block_size as u64;
        let used = state.ring.used() as u64;
        (state.current_block + used / block_size, used % block_size)
    }

    /// Whole blocks written since open
    pub fn flushed_blocks(&self) -> u64 {
        self.shared.state.lock().flushed_blocks
    }
}

impl Drop for WriteBuffer {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.shutdown() {
                tracing::error!("Write buffer shutdown failed: {}", e);
            }
        }
    }
}

/// Background loop: flush, then sleep until signalled or the interval passes
fn flush_worker(shared: Arc<Shared>, wake: Receiver<()>, interval: Duration) {
    tracing::debug!("Flush worker started");

    while !shared.shutdown.load(Ordering::Acquire) {
        // Retry a failed partial flush as a partial flush
        let partial = shared.state.lock().fault.as_ref().map_or(false, |f| f.partial);
        if let Err(e) = shared.flush(partial) {
            tracing::error!("Background flush failed: {}", e);
        }
        if !Shared::wait_for_data(&wake, interval) {
            break;
        }
    }

    tracing::debug!("Flush worker stopped");
}

//! In-memory block device
//!
//! Used by tests and benchmarks. Counts device I/O and can be told to fail
//! reads or writes to exercise error paths.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{check_request, BlockDevice};

/// Block device backed by a byte vector
pub struct MemoryDevice {
    block_size: u32,
    data: RwLock<Vec<u8>>,
    /// Number of successful block reads/writes (one per request)
    reads: AtomicU64,
    writes: AtomicU64,
    /// Failure injection switches
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryDevice {
    /// Create a zero-filled device of `block_count` blocks
    pub fn new(block_size: u32, block_count: u64) -> Self {
        Self {
            block_size,
            data: RwLock::new(vec![0u8; (block_size as u64 * block_count) as usize]),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Number of read requests served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write requests served
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every following read fail (or succeed again)
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every following write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of the raw device contents
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl BlockDevice for MemoryDevice {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn size(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        let data = self.data.read();
        check_request(self.block_size, data.len() as u64, offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        let mut data = self.data.write();
        check_request(self.block_size, data.len() as u64, offset, buf.len())?;
        let start = offset as usize;
        data[start..start + buf.len()].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

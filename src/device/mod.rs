//! Block Device Module
//!
//! Fixed-size block storage underneath the append log.
//!
//! ## Responsibilities
//! - Block-granular reads and writes at absolute byte offsets
//! - A fixed addressable extent (`size()`)
//! - Durability barrier (`sync()`)
//!
//! ## Layout used by the log
//! ```text
//! ┌───────────┬───────────┬───────────┬─────┐
//! │ Block 0   │ Block 1   │ Block 2   │ ... │
//! │ Metadata  │ Log data (logical offset 0 ...)│
//! └───────────┴───────────┴───────────┴─────┘
//! ```

mod file;
mod memory;

use std::io;

pub use file::FileDevice;
pub use memory::MemoryDevice;

/// A device addressed in whole blocks.
///
/// Every request must start on a block boundary, cover a whole number of
/// blocks, and lie inside `size()`.
pub trait BlockDevice: Send + Sync {
    /// Block size in bytes
    fn block_size(&self) -> u32;

    /// Total addressable extent in bytes
    fn size(&self) -> u64;

    /// Read `buf.len()` bytes starting at `offset`
    fn read(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write `buf` starting at `offset`
    fn write(&self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Make previous writes durable
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Validate a request against block alignment and device extent
pub(crate) fn check_request(block_size: u32, size: u64, offset: u64, len: usize) -> io::Result<()> {
    let block_size = block_size as u64;
    let len = len as u64;

    if offset % block_size != 0 || len % block_size != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "unaligned request: offset={} len={} block_size={}",
                offset, len, block_size
            ),
        ));
    }

    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("request {}+{} beyond device extent {}", offset, len, size),
        )),
    }
}

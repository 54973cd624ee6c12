//! Byte ranges in the log address space.

use serde::{Deserialize, Serialize};

/// Half-open byte range `[address, address + size)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub address: u64,
    pub size: u64,
}

impl Region {
    pub fn new(address: u64, size: u64) -> Self {
        Self { address, size }
    }

    /// First address past the region
    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

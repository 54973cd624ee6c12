//! Configuration for ChainKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KvError, Result};

/// Smallest block size the log accepts (metadata must fit in one block)
pub const MIN_BLOCK_SIZE: u32 = 64;

/// Main configuration for a ChainKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Device Configuration
    // -------------------------------------------------------------------------
    /// Device image file used by `Engine::open`
    /// Layout:
    ///   block 0      metadata (write cursor, index checkpoint region)
    ///   block 1..    append-only record log
    pub path: PathBuf,

    /// Block size used when creating a file device (bytes, power of two)
    pub block_size: u32,

    /// Addressable extent of a file device, in blocks
    pub device_blocks: u64,

    // -------------------------------------------------------------------------
    // Log Configuration
    // -------------------------------------------------------------------------
    /// Write buffer capacity, in blocks
    pub write_buffer_blocks: usize,

    /// Read cache capacity, in blocks
    pub read_cache_blocks: usize,

    /// Period of the background flush when no append wakes it (milliseconds)
    pub flush_interval_ms: u64,

    // -------------------------------------------------------------------------
    // Persistence Configuration
    // -------------------------------------------------------------------------
    /// Resume the log and restore the index checkpoint on open
    pub persistence: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./chainkv.img"),
            block_size: 4096,
            device_blocks: 65536, // 256 MB at 4 KB blocks
            write_buffer_blocks: 32,
            read_cache_blocks: 256,
            flush_interval_ms: 1000,
            persistence: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Flush interval as a Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Check that the configuration describes a usable log
    pub fn validate(&self) -> Result<()> {
        validate_block_size(self.block_size)?;
        if self.device_blocks < 2 {
            return Err(KvError::Config(format!(
                "device needs at least 2 blocks, got {}",
                self.device_blocks
            )));
        }
        if self.write_buffer_blocks == 0 {
            return Err(KvError::Config("write buffer needs at least one block".to_string()));
        }
        if self.read_cache_blocks == 0 {
            return Err(KvError::Config("read cache needs at least one block".to_string()));
        }
        if self.flush_interval_ms == 0 {
            return Err(KvError::Config("flush interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Block sizes must be powers of two and hold the metadata record
pub(crate) fn validate_block_size(block_size: u32) -> Result<()> {
    if block_size < MIN_BLOCK_SIZE || !block_size.is_power_of_two() {
        return Err(KvError::Config(format!(
            "block size must be a power of two >= {}, got {}",
            MIN_BLOCK_SIZE, block_size
        )));
    }
    Ok(())
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the device image path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the block size for newly created file devices
    pub fn block_size(mut self, size: u32) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the file device extent (in blocks)
    pub fn device_blocks(mut self, blocks: u64) -> Self {
        self.config.device_blocks = blocks;
        self
    }

    /// Set the write buffer capacity (in blocks)
    pub fn write_buffer_blocks(mut self, blocks: usize) -> Self {
        self.config.write_buffer_blocks = blocks;
        self
    }

    /// Set the read cache capacity (in blocks)
    pub fn read_cache_blocks(mut self, blocks: usize) -> Self {
        self.config.read_cache_blocks = blocks;
        self
    }

    /// Set the background flush interval (in milliseconds)
    pub fn flush_interval_ms(mut self, ms: u64) -> Self {
        self.config.flush_interval_ms = ms;
        self
    }

    /// Enable or disable persistence across open/close
    pub fn persistence(mut self, enabled: bool) -> Self {
        self.config.persistence = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

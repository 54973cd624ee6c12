//! Error types for ChainKV
//!
//! Provides a unified error type for all operations.
//!
//! Precondition failures of the key-value operations (key already present,
//! key missing) are not errors; they are reported through
//! [`Outcome`](crate::engine::Outcome).

use thiserror::Error;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for ChainKV operations
#[derive(Debug, Error)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A background flush failed and no later flush has written a block yet
    #[error("Write buffer flush failed: {0}")]
    Flush(String),

    #[error("Device full: need {needed} bytes, device holds {capacity}")]
    DeviceFull { needed: u64, capacity: u64 },

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    #[error("Read of {len} bytes at offset {offset} runs past end of log ({end})")]
    OutOfBounds { offset: u64, len: u64, end: u64 },

    #[error("Log corruption detected: {0}")]
    Corruption(String),

    #[error("Log is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for KvError {
    fn from(err: bincode::Error) -> Self {
        KvError::Serialization(err.to_string())
    }
}

//! # ChainKV
//!
//! A log-structured key-value store with:
//! - An append-only log over a fixed-size block device
//! - A write-staging ring buffer drained by a background flush worker
//! - A block read cache in front of the device
//! - Per-key record chains resolved through an in-memory index
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │      insert / update / replace / remove / lookup             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Index    │          │ ChainStore  │
//!   │ key → head  │          │  (records)  │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │  AppendLog  │
//!                           └──┬───────┬──┘
//!                              │       │
//!                   ┌──────────▼─┐   ┌─▼──────────┐
//!                   │WriteBuffer │   │ ReadCache  │
//!                   │ (flusher)  │   │ (blocks)   │
//!                   └──────────┬─┘   └─┬──────────┘
//!                              ▼       ▼
//!                           ┌─────────────┐
//!                           │ BlockDevice │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod device;
pub mod log;
pub mod store;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{KvError, Result};
pub use config::Config;
pub use device::{BlockDevice, FileDevice, MemoryDevice};
pub use engine::{status_code, Engine, EngineStats, Outcome};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ChainKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

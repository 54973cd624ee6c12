//! Append Log Module
//!
//! A single logical append-only byte stream with random read-back.
//!
//! ## Responsibilities
//! - Stage appends in a circular write buffer (backpressure when full)
//! - Drain whole blocks to the device from a background flush worker
//! - Serve flushed data through a block read cache
//! - Persist the write cursor and index location in block 0
//!
//! ## Read Path
//! ```text
//!   logical offset + RESERVED_BLOCKS * block_size
//!                     │
//!          ┌──────────▼───────────┐
//!          │      ReadPlan        │
//!          └──┬────────┬───────┬──┘
//!    Cache    │ Split  │       │ Buffer
//!             ▼        ▼       ▼
//!   ┌──────────────┐       ┌──────────────┐
//!   │  ReadCache   │       │ WriteBuffer  │
//!   │ (< boundary) │       │ (>= boundary)│
//!   └──────┬───────┘       └──────┬───────┘
//!          ▼                      │ flush worker
//!   ┌──────────────┐              │
//!   │ BlockDevice  │◄─────────────┘
//!   └──────────────┘
//! ```

mod append_log;
mod metadata;
mod read_cache;
mod region;
mod ring;
mod write_buffer;

pub use append_log::AppendLog;
pub use metadata::{Metadata, RESERVED_BLOCKS};
pub use read_cache::{CacheStats, ReadCache};
pub use region::Region;
pub use write_buffer::{BufferView, WriteBuffer};

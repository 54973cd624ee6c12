//! Store Module
//!
//! Key-value records chained through the append log, and the in-memory
//! index that points at each key's newest record.
//!
//! ## Chains
//! ```text
//!  Index                       Log
//!  ┌──────┬─────┐
//!  │ "k1" │ 412 ├──► @412 [prev=133 | "k1" | v3]
//!  └──────┴─────┘            │
//!                            └──► @133 [prev=8 | "k1" | v2]
//!                                        │
//!                                        └──► @8 [prev=0 | "k1" | v1]
//! ```
//! A record with an empty value is a tombstone.

mod chain;
mod index;
mod record;

pub use chain::{ChainHit, ChainStore};
pub use index::Index;
pub use record::{
    encode_record, validate_key, validate_value, Record, RecordHeader, MAX_KEY_LEN,
    MAX_VALUE_LEN, NULL_OFFSET, RECORD_HEADER_SIZE,
};

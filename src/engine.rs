//! Engine Module
//!
//! The key-value database: mutation and lookup operations over the index and
//! the chained record store.
//!
//! ## Responsibilities
//! - Check existence preconditions (insert / update / replace / remove)
//! - Append exactly one record per successful mutation and relink the index
//! - Maintain the live-key (`size`) and superseded-record (`waste`) counters
//! - Checkpoint the index on close and restore it on open

use std::fs;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::device::{BlockDevice, FileDevice};
use crate::error::{KvError, Result};
use crate::log::{AppendLog, CacheStats};
use crate::store::{validate_key, validate_value, ChainHit, ChainStore, Index, NULL_OFFSET};

/// Result of a mutation that did not fail with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The record was appended and the index relinked
    Applied,
    /// `insert` on a key that has a live value
    KeyExists,
    /// `replace` / `remove` on a key without a live value
    KeyNotFound,
}

impl Outcome {
    /// `0` when applied, `+1` on a precondition violation
    pub fn code(self) -> i32 {
        match self {
            Outcome::Applied => 0,
            Outcome::KeyExists | Outcome::KeyNotFound => 1,
        }
    }

    pub fn is_applied(self) -> bool {
        self == Outcome::Applied
    }
}

/// Tri-state status of a mutation: `0` applied, `+1` precondition, `-1` error
pub fn status_code(result: &Result<Outcome>) -> i32 {
    match result {
        Ok(outcome) => outcome.code(),
        Err(_) => -1,
    }
}

/// Engine counters and component statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Keys whose newest record holds a value
    pub size: u64,
    /// Records superseded by a later record or tombstoned
    pub waste: u64,
    /// Index cells (including keys that are currently removed)
    pub indexed_keys: usize,
    /// Logical log length in bytes
    pub log_len: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Insert,
    Update,
    Replace,
    Remove,
}

/// What `close` writes to the log and `open` reads back
#[derive(Serialize, Deserialize)]
struct Checkpoint {
    size: u64,
    waste: u64,
    index: Vec<u8>,
}

struct EngineState {
    index: Index,
    store: ChainStore,
    size: u64,
    waste: u64,
}

/// The key-value database
///
/// ## Concurrency Model
///
/// - **Mutations** hold the state lock exclusively across the whole
///   chain-lookup → append → relink sequence, so concurrent mutators of the
///   same key cannot interleave
/// - **Lookups** share the lock and run concurrently
/// - The append log underneath runs its own flush worker
pub struct Engine {
    config: Config,
    state: RwLock<EngineState>,
}

impl Engine {
    /// Open the database on the image file named by `config.path`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let device = FileDevice::open(&config.path, config.block_size, config.device_blocks)?;
        Self::open_with_device(Arc::new(device), config)
    }

    /// Open the database on an existing device
    ///
    /// On startup:
    /// 1. Open the append log (loads metadata when persistence is on)
    /// 2. Open the record store on it
    /// 3. Restore the index checkpoint, or start with an empty index
    pub fn open_with_device(device: Arc<dyn BlockDevice>, config: Config) -> Result<Self> {
        config.validate()?;

        let log = AppendLog::open(device, &config)?;
        let store = ChainStore::open(log)?;

        let (index, size, waste) = if config.persistence {
            Self::restore(&store)?
        } else {
            (Index::new(), 0, 0)
        };

        Ok(Self {
            config,
            state: RwLock::new(EngineState {
                index,
                store,
                size,
                waste,
            }),
        })
    }

    fn restore(store: &ChainStore) -> Result<(Index, u64, u64)> {
        let region = store.log().index_region();
        if region.is_empty() {
            return Ok((Index::new(), 0, 0));
        }

        let bytes = store.read_blob(region)?;
        let checkpoint: Checkpoint = bincode::deserialize(&bytes)
            .map_err(|e| KvError::Corruption(format!("bad index checkpoint: {}", e)))?;
        let index = Index::deserialize(&checkpoint.index)?;

        tracing::info!(
            "Restored index: {} keys, size={}, waste={}",
            index.len(),
            checkpoint.size,
            checkpoint.waste
        );
        Ok((index, checkpoint.size, checkpoint.waste))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add a key that has no live value
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<Outcome> {
        validate_value(value)?;
        self.mutate(key, Some(value), Mutation::Insert).map(|(outcome, _)| outcome)
    }

    /// Set a key's value whether or not it exists
    pub fn update(&self, key: &[u8], value: &[u8]) -> Result<Outcome> {
        validate_value(value)?;
        self.mutate(key, Some(value), Mutation::Update).map(|(outcome, _)| outcome)
    }

    /// Overwrite the value of a key that has a live value
    pub fn replace(&self, key: &[u8], value: &[u8]) -> Result<Outcome> {
        validate_value(value)?;
        self.mutate(key, Some(value), Mutation::Replace).map(|(outcome, _)| outcome)
    }

    /// Remove a key that has a live value
    pub fn remove(&self, key: &[u8]) -> Result<Outcome> {
        self.mutate(key, None, Mutation::Remove).map(|(outcome, _)| outcome)
    }

    /// Remove a key and return the value it held
    pub fn take(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.mutate(key, None, Mutation::Remove).map(|(_, previous)| previous)
    }

    /// Shared mutation path.
    ///
    /// Returns the outcome and the key's live value before the mutation.
    fn mutate(
        &self,
        key: &[u8],
        value: Option<&[u8]>,
        mode: Mutation,
    ) -> Result<(Outcome, Option<Vec<u8>>)> {
        validate_key(key)?;

        let mut guard = self.state.write();
        let EngineState {
            index,
            store,
            size,
            waste,
        } = &mut *guard;

        let head = index.lookup(key).copied().unwrap_or(NULL_OFFSET);
        let live = match store.lookup_chain(key, head)? {
            Some(ChainHit {
                value: Some(value), ..
            }) => Some(value),
            _ => None,
        };

        match (mode, live.is_some()) {
            (Mutation::Insert, true) => return Ok((Outcome::KeyExists, live)),
            (Mutation::Replace | Mutation::Remove, false) => return Ok((Outcome::KeyNotFound, None)),
            _ => {}
        }

        // The cell is created or moved only once the record is in the log
        let offset = store.append_record(key, value, head)?;
        *index.update(key) = offset;

        match (mode, live.is_some()) {
            (Mutation::Remove, _) => {
                *size -= 1;
                *waste += 1;
            }
            (Mutation::Insert, _) | (Mutation::Update, false) => *size += 1,
            (Mutation::Update, true) | (Mutation::Replace, _) => *waste += 1,
        }

        tracing::trace!("{:?} applied at offset {}", mode, offset);
        Ok((Outcome::Applied, live))
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Newest value of `key`, or `None` if it was never set or is removed
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let state = self.state.read();

        let head = match state.index.lookup(key) {
            Some(&offset) if offset != NULL_OFFSET => offset,
            _ => return Ok(None),
        };

        Ok(state
            .store
            .lookup_chain(key, head)?
            .and_then(|hit| hit.value))
    }

    /// Whether `key` has a live value
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Every version of `key`, newest first; `None` marks a removal
    pub fn history(&self, key: &[u8]) -> Result<Vec<Option<Vec<u8>>>> {
        validate_key(key)?;
        let state = self.state.read();

        let head = match state.index.lookup(key) {
            Some(&offset) => offset,
            None => return Ok(Vec::new()),
        };

        Ok(state
            .store
            .versions(key, head)?
            .into_iter()
            .map(|record| record.value)
            .collect())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Write everything buffered to the device, including a partial block
    pub fn flush(&self) -> Result<()> {
        self.state.read().store.log().flush(true)
    }

    /// Checkpoint the index and counters, then close the log
    pub fn close(self) -> Result<()> {
        let state = self.state.into_inner();

        let checkpoint = Checkpoint {
            size: state.size,
            waste: state.waste,
            index: state.index.serialize()?,
        };
        let bytes = bincode::serialize(&checkpoint)?;
        let region = state.store.append_blob(&bytes)?;
        state.store.log().set_index_region(region);

        tracing::info!(
            "Saved index checkpoint: {} keys, {} bytes",
            state.index.len(),
            bytes.len()
        );
        state.store.close()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of keys with a live value
    pub fn size(&self) -> u64 {
        self.state.read().size
    }

    /// Number of superseded or tombstoned records
    pub fn waste(&self) -> u64 {
        self.state.read().waste
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.read();
        EngineStats {
            size: state.size,
            waste: state.waste,
            indexed_keys: state.index.len(),
            log_len: state.store.log().len(),
            cache: state.store.log().cache_stats(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

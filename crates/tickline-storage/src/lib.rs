//! Tickline Storage -- transactional key-value backend contract.
//!
//! The tick engine never talks to a concrete database. It consumes the
//! [`KvBackend`] trait: point reads of counters and byte strings, immediate
//! writes, and a pipelined transaction mode in which commands are queued into
//! a [`WriteBatch`] and committed all-or-nothing.
//!
//! Two adapters ship with the crate:
//!
//! - [`MemoryBackend`]: an ordered in-memory map with failure injection, used
//!   by tests and by simulations that do not need durability.
//! - [`FileBackend`]: a durable single-file store that commits by writing a
//!   temporary file, syncing it, and renaming it over the previous state.
//!
//! # Counters
//!
//! Counters are stored as decimal ASCII, the way Redis stores integers. A
//! counter that was never written reads back as `None`, which callers must
//! not confuse with a stored zero.
//!
//! # Example
//!
//! ```
//! use tickline_storage::{KvBackend, MemoryBackend};
//!
//! let mut store = MemoryBackend::new();
//! assert_eq!(store.get_u64("start").unwrap(), None);
//!
//! let mut batch = store.start_transaction();
//! batch.set("journal", b"[]".to_vec());
//! batch.incr("start");
//! store.commit(batch).unwrap();
//!
//! assert_eq!(store.get_u64("start").unwrap(), Some(1));
//! assert_eq!(store.get_bytes("journal").unwrap(), Some(b"[]".to_vec()));
//! ```

#![deny(unsafe_code)]

mod batch;
mod file;
mod memory;

pub use batch::{KvCommand, WriteBatch};
pub use file::FileBackend;
pub use memory::MemoryBackend;

use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A counter operation hit a value that is not a decimal `u64`.
    #[error("value at key '{key}' is not an unsigned integer")]
    NotAnInteger {
        /// The offending key.
        key: String,
    },

    /// The backend could not serve the request (transport or commit failure).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Filesystem failure in a durable backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A durable backend's file uses a layout this build does not read.
    #[error("unsupported store format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version recorded in the file.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// A durable backend's file could not be parsed.
    #[error("corrupt store file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// ---------------------------------------------------------------------------
// KvBackend
// ---------------------------------------------------------------------------

/// A key-value store with atomic multi-command commits.
///
/// Reads take `&self`; every write takes `&mut self`, so two batches can
/// never interleave at the command level.
pub trait KvBackend {
    /// Read a counter. `Ok(None)` means the key has never been written.
    fn get_u64(&self, key: &str) -> StorageResult<Option<u64>>;

    /// Read a byte string. `Ok(None)` means the key has never been written.
    fn get_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Write a byte string immediately.
    fn set_bytes(&mut self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Increment a counter immediately and return its new value.
    fn incr(&mut self, key: &str) -> StorageResult<u64>;

    /// Delete a key immediately. Deleting an absent key is not an error.
    fn delete(&mut self, key: &str) -> StorageResult<()>;

    /// Begin a pipelined transaction.
    fn start_transaction(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Apply every command in `batch`, in order, as one atomic unit.
    ///
    /// On error nothing from the batch is visible.
    fn commit(&mut self, batch: WriteBatch) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Parse a stored counter.
pub(crate) fn parse_u64(key: &str, raw: &[u8]) -> StorageResult<u64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| StorageError::NotAnInteger {
            key: key.to_owned(),
        })
}

/// The value a counter takes after one increment.
pub(crate) fn next_counter(key: &str, current: Option<&[u8]>) -> StorageResult<u64> {
    match current {
        Some(raw) => parse_u64(key, raw)?
            .checked_add(1)
            .ok_or_else(|| StorageError::NotAnInteger {
                key: key.to_owned(),
            }),
        None => Ok(1),
    }
}

/// Stage `batch` on top of `base` without touching it.
///
/// Returns the overlay of keys the batch writes (`None` = deleted). Any
/// failing command aborts the whole batch before the caller merges anything.
pub(crate) fn stage_batch(
    base: &BTreeMap<String, Vec<u8>>,
    batch: WriteBatch,
) -> StorageResult<BTreeMap<String, Option<Vec<u8>>>> {
    let mut overlay: BTreeMap<String, Option<Vec<u8>>> = BTreeMap::new();
    for command in batch.into_commands() {
        match command {
            KvCommand::Set { key, value } => {
                overlay.insert(key, Some(value));
            }
            KvCommand::Delete { key } => {
                overlay.insert(key, None);
            }
            KvCommand::Incr { key } => {
                let next = {
                    let current = match overlay.get(&key) {
                        Some(staged) => staged.as_deref(),
                        None => base.get(&key).map(Vec::as_slice),
                    };
                    next_counter(&key, current)?
                };
                overlay.insert(key, Some(next.to_string().into_bytes()));
            }
        }
    }
    Ok(overlay)
}

/// Merge a staged overlay into `base`.
pub(crate) fn merge_overlay(
    base: &mut BTreeMap<String, Vec<u8>>,
    overlay: BTreeMap<String, Option<Vec<u8>>>,
) {
    for (key, value) in overlay {
        match value {
            Some(bytes) => {
                base.insert(key, bytes);
            }
            None => {
                base.remove(&key);
            }
        }
    }
}

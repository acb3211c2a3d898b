//! In-memory backend with failure injection.

use std::collections::BTreeMap;

use crate::{
    merge_overlay, next_counter, parse_u64, stage_batch, KvBackend, StorageError, StorageResult,
    WriteBatch,
};

/// An ordered in-memory key-value store.
///
/// Committed state survives only as long as the value itself, so tests that
/// simulate a restart hand the same `MemoryBackend` to a fresh owner.
///
/// Faults can be injected to exercise the atomicity guarantees:
/// [`fail_next_commit`](Self::fail_next_commit) rejects the next batch after
/// it has been staged, and [`fail_reads`](Self::fail_reads) makes every read
/// return [`StorageError::Unavailable`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: BTreeMap<String, Vec<u8>>,
    fail_next_commit: bool,
    fail_reads: bool,
    commit_count: u64,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`commit`](KvBackend::commit) fail after staging.
    pub fn fail_next_commit(&mut self) {
        self.fail_next_commit = true;
    }

    /// Toggle read failures.
    pub fn fail_reads(&mut self, enabled: bool) {
        self.fail_reads = enabled;
    }

    /// Number of batches committed successfully.
    pub fn commit_count(&self) -> u64 {
        self.commit_count
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over every key in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    fn check_reads(&self) -> StorageResult<()> {
        if self.fail_reads {
            return Err(StorageError::Unavailable("injected read failure".to_owned()));
        }
        Ok(())
    }
}

impl KvBackend for MemoryBackend {
    fn get_u64(&self, key: &str) -> StorageResult<Option<u64>> {
        self.check_reads()?;
        self.data.get(key).map(|raw| parse_u64(key, raw)).transpose()
    }

    fn get_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check_reads()?;
        Ok(self.data.get(key).cloned())
    }

    fn set_bytes(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.data.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn incr(&mut self, key: &str) -> StorageResult<u64> {
        let next = next_counter(key, self.data.get(key).map(Vec::as_slice))?;
        self.data
            .insert(key.to_owned(), next.to_string().into_bytes());
        Ok(next)
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        self.data.remove(key);
        Ok(())
    }

    fn commit(&mut self, batch: WriteBatch) -> StorageResult<()> {
        let overlay = stage_batch(&self.data, batch)?;
        if std::mem::take(&mut self.fail_next_commit) {
            return Err(StorageError::Unavailable(
                "injected commit failure".to_owned(),
            ));
        }
        merge_overlay(&mut self.data, overlay);
        self.commit_count += 1;
        Ok(())
    }
}

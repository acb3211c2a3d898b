//! Durable single-file backend.
//!
//! The whole key space is kept in memory and persisted as one JSON document.
//! Every write replaces the document atomically: the new contents go to a
//! sibling `*.tmp` file, the file is synced, renamed over the original, and
//! the containing directory is synced so the rename itself is durable. A
//! crash at any point leaves either the previous or the new document on disk,
//! never a mixture, which is exactly the all-or-nothing guarantee
//! [`KvBackend::commit`] requires.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    merge_overlay, next_counter, parse_u64, stage_batch, KvBackend, StorageError, StorageResult,
    WriteBatch,
};

/// On-disk document layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    /// Format version, bumped on incompatible layout changes.
    version: u32,
    entries: BTreeMap<String, Vec<u8>>,
}

const STORE_FORMAT_VERSION: u32 = 1;

/// A durable key-value store backed by a single file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    data: BTreeMap<String, Vec<u8>>,
}

impl FileBackend {
    /// Open the store at `path`, creating an empty one if the file does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`](crate::StorageError::Io) if the file
    /// cannot be read, [`StorageError::Corrupt`](crate::StorageError::Corrupt)
    /// if it does not parse, and
    /// [`StorageError::UnsupportedVersion`](crate::StorageError::UnsupportedVersion)
    /// if it was written in another format version.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read(&path)?;
            let file: StoreFile = serde_json::from_slice(&raw)?;
            if file.version != STORE_FORMAT_VERSION {
                return Err(StorageError::UnsupportedVersion {
                    found: file.version,
                    expected: STORE_FORMAT_VERSION,
                });
            }
            debug!(
                path = %path.display(),
                keys = file.entries.len(),
                version = file.version,
                "opened store file"
            );
            file.entries
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, data })
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data` to disk, replacing the previous document atomically.
    fn persist(path: &Path, data: &BTreeMap<String, Vec<u8>>) -> StorageResult<()> {
        let doc = StoreFile {
            version: STORE_FORMAT_VERSION,
            entries: data.clone(),
        };
        let bytes = serde_json::to_vec(&doc)?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        sync_parent(path)
    }

    /// Apply an overlay to a copy of the current state, persist it, and only
    /// then swap it in.
    fn apply(&mut self, overlay: BTreeMap<String, Option<Vec<u8>>>) -> StorageResult<()> {
        let mut next = self.data.clone();
        merge_overlay(&mut next, overlay);
        Self::persist(&self.path, &next)?;
        self.data = next;
        Ok(())
    }
}

/// Flush the directory entry of `path` so a completed rename survives power
/// loss.
#[cfg(unix)]
fn sync_parent(path: &Path) -> StorageResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

// Directories cannot be opened as files here; the rename is as durable as
// the platform makes it.
#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StorageResult<()> {
    Ok(())
}

impl KvBackend for FileBackend {
    fn get_u64(&self, key: &str) -> StorageResult<Option<u64>> {
        self.data.get(key).map(|raw| parse_u64(key, raw)).transpose()
    }

    fn get_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn set_bytes(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut overlay = BTreeMap::new();
        overlay.insert(key.to_owned(), Some(value.to_vec()));
        self.apply(overlay)
    }

    fn incr(&mut self, key: &str) -> StorageResult<u64> {
        let next = next_counter(key, self.data.get(key).map(Vec::as_slice))?;
        let mut overlay = BTreeMap::new();
        overlay.insert(key.to_owned(), Some(next.to_string().into_bytes()));
        self.apply(overlay)?;
        Ok(next)
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        if !self.data.contains_key(key) {
            return Ok(());
        }
        let mut overlay = BTreeMap::new();
        overlay.insert(key.to_owned(), None);
        self.apply(overlay)
    }

    fn commit(&mut self, batch: WriteBatch) -> StorageResult<()> {
        let commands = batch.len();
        let overlay = stage_batch(&self.data, batch)?;
        self.apply(overlay)?;
        debug!(path = %self.path.display(), commands, "committed batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("tickline.db")
    }

    #[test]
    fn open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackend::open(store_path(&dir)).unwrap();
        assert_eq!(store.get_u64("start").unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn committed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        {
            let mut store = FileBackend::open(&path).unwrap();
            let mut batch = store.start_transaction();
            batch.set("journal", b"[1,2,3]".to_vec());
            batch.incr("start");
            store.commit(batch).unwrap();
            store.incr("end").unwrap();
        }

        let store = FileBackend::open(&path).unwrap();
        assert_eq!(store.get_u64("start").unwrap(), Some(1));
        assert_eq!(store.get_u64("end").unwrap(), Some(1));
        assert_eq!(store.get_bytes("journal").unwrap(), Some(b"[1,2,3]".to_vec()));
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let mut store = FileBackend::open(&path).unwrap();
        store.set_bytes("bad", b"xyz").unwrap();
        let before = fs::read(&path).unwrap();

        let mut batch = store.start_transaction();
        batch.set("journal", b"payload".to_vec());
        batch.incr("bad");
        let err = store.commit(batch).unwrap_err();
        assert!(matches!(err, StorageError::NotAnInteger { .. }));

        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(store.get_bytes("journal").unwrap(), None);
    }

    #[test]
    fn delete_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        let mut store = FileBackend::open(&path).unwrap();
        store.set_bytes("k", b"v").unwrap();
        store.delete("k").unwrap();
        store.delete("never-written").unwrap();
        drop(store);

        let store = FileBackend::open(&path).unwrap();
        assert_eq!(store.get_bytes("k").unwrap(), None);
    }

    #[test]
    fn other_format_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        fs::write(&path, br#"{"version":2,"entries":{}}"#).unwrap();

        let err = FileBackend::open(&path).unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnsupportedVersion {
                found: 2,
                expected: STORE_FORMAT_VERSION,
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn parent_directory_is_synced() {
        let dir = tempfile::tempdir().unwrap();
        sync_parent(&store_path(&dir)).unwrap();

        let missing = dir.path().join("gone").join("tickline.db");
        let err = sync_parent(&missing).unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        fs::write(&path, b"{ not json").unwrap();

        let err = FileBackend::open(&path).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)));
    }
}

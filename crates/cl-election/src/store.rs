//! Shared lease storage
//!
//! A [`LeaseStore`] is a plain key-value store visible to every execution
//! context in one scope. It offers no compare-and-swap and no atomicity
//! across keys: when two contexts write near-simultaneously, the later
//! physical write wins.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;

/// Key-value storage shared between execution contexts.
pub trait LeaseStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Process-local store. Clones share the same entries, so every context
/// built from clones of one store sits in the same scope.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeaseStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store keeping one file per key in a directory.
///
/// Every process on the machine pointing at the same directory shares the
/// lease. Writes are plain overwrites with no locking.
#[derive(Debug, Clone)]
pub struct FileLeaseStore {
    dir: PathBuf,
}

impl FileLeaseStore {
    /// The directory is created on first write.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name_for(key))
    }
}

/// Map a key or channel name onto a single safe file name.
pub(crate) fn file_name_for(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl LeaseStore for FileLeaseStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        trace!(?path, "Writing lease entry");
        std::fs::write(path, value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_clones_share_entries() {
        let a = MemoryLeaseStore::new();
        let b = a.clone();

        a.set("k", "v1").unwrap();
        assert_eq!(b.get("k").unwrap().as_deref(), Some("v1"));

        b.set("k", "v2").unwrap();
        assert_eq!(a.get("k").unwrap().as_deref(), Some("v2"));

        a.delete("k").unwrap();
        a.delete("k").unwrap();
        assert!(b.is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLeaseStore::new(dir.path().join("lease"));

        assert_eq!(store.get("cardlock.leader.holder_id").unwrap(), None);

        store.set("cardlock.leader.holder_id", "ctx-1").unwrap();
        assert_eq!(
            store.get("cardlock.leader.holder_id").unwrap().as_deref(),
            Some("ctx-1")
        );

        store.delete("cardlock.leader.holder_id").unwrap();
        store.delete("cardlock.leader.holder_id").unwrap();
        assert_eq!(store.get("cardlock.leader.holder_id").unwrap(), None);
    }

    #[test]
    fn test_file_store_shared_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileLeaseStore::new(dir.path());
        let second = FileLeaseStore::new(dir.path());

        first.set("renewed_at", "1000").unwrap();
        second.set("renewed_at", "2000").unwrap();

        assert_eq!(first.get("renewed_at").unwrap().as_deref(), Some("2000"));
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLeaseStore::new(dir.path());

        store.set("../escape/key", "x").unwrap();
        assert!(dir.path().join(".._escape_key").exists());
        assert_eq!(store.get("../escape/key").unwrap().as_deref(), Some("x"));
    }
}

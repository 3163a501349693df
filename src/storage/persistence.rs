//! KeyValueStore trait: pluggable small key-value backend
//!
//! Two users, both on their own tree/namespace:
//! - the memory manager's purge of temporary/cache/backup keys
//! - the smart reloader's short-lived restart snapshot
//!
//! Backends:
//! - `InMemoryStore`: for tests and hosts without a writable disk
//! - `SledStore`: a named tree in a sled database

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Trait for pluggable key-value backends
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a key, returning its previous value
    fn remove(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// All keys currently present, in byte order
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Persist pending writes. Backends without write-back buffering have nothing to do.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("key is not valid UTF-8")]
    InvalidKey,
}

// ============================================================================
// In-memory backend
// ============================================================================

/// In-memory store. Not durable: data is lost on restart.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.write().remove(key))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

// ============================================================================
// Sled backend
// ============================================================================

/// One named tree inside a sled database
///
/// Writes are not flushed individually; sled flushes in the background.
/// Callers that need durability right away (the reload snapshot, written just
/// before the process is replaced) call `flush`.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    tree: sled::Tree,
}

impl SledStore {
    /// Open or create the database at `path` and use tree `tree`
    pub fn open<P: AsRef<Path>>(path: P, tree: &str) -> Result<Self, StoreError> {
        let db = Arc::new(sled::open(path)?);
        let tree = db.open_tree(tree)?;
        Ok(Self { db, tree })
    }

    /// Another tree in the same database
    pub fn sibling(&self, tree: &str) -> Result<Self, StoreError> {
        Ok(Self {
            db: Arc::clone(&self.db),
            tree: self.db.open_tree(tree)?,
        })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.get(key)?.map(|v| v.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.remove(key)?.map(|v| v.to_vec()))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.tree
            .iter()
            .keys()
            .map(|key| {
                let key = key?;
                String::from_utf8(key.to_vec()).map_err(|_| StoreError::InvalidKey)
            })
            .collect()
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_set_get_remove() {
        let store = InMemoryStore::new();
        store.set("temp_route", b"abc").unwrap();

        assert_eq!(store.get("temp_route").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(store.remove("temp_route").unwrap(), Some(b"abc".to_vec()));
        assert!(store.get("temp_route").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn KeyValueStore> = Box::new(InMemoryStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        store.set("b", b"2").unwrap();
        store.set("a", b"1").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_sled_trees_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let persisted = SledStore::open(dir.path(), "persisted").unwrap();
        let session = persisted.sibling("session").unwrap();

        persisted.set("cache_tiles", b"x").unwrap();
        session.set("healthd.reload_state", b"{}").unwrap();

        assert_eq!(persisted.keys().unwrap(), vec!["cache_tiles".to_string()]);
        assert_eq!(session.keys().unwrap(), vec!["healthd.reload_state".to_string()]);
        assert!(session.get("cache_tiles").unwrap().is_none());
    }

    #[test]
    fn test_sled_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path(), "session").unwrap();
            store.set("k", b"v").unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(dir.path(), "session").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    }
}

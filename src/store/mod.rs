//! Persistence: the key-value collections backing portfolios and the JSON
//! files backing the rate cache and history log.

pub mod disk;
pub mod history;
pub mod memory;
pub mod portfolio;
pub mod rates;

use anyhow::{Context, Result};
use async_trait::async_trait;
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

pub use history::HistoryStore;
pub use portfolio::PortfolioRepository;
pub use rates::{RateStore, StoredBatch};

#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    async fn remove(&self, key: &[u8]) -> Result<()>;
}

/// A store handing out named collections, either backed by a `fjall`
/// keyspace or held in memory.
pub struct KeyValueStore {
    collections: Mutex<HashMap<String, Arc<dyn KeyValueCollection>>>,
    keyspace: Option<Keyspace>,
}

impl KeyValueStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path.join("kv"))
            .open()
            .with_context(|| format!("Failed to open key-value store at {}", path.display()))?;

        Ok(Self {
            collections: Mutex::new(HashMap::new()),
            keyspace: Some(keyspace),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            keyspace: None,
        }
    }

    /// Returns the named collection, creating it on first use.
    pub fn collection(&self, name: &str) -> Result<Arc<dyn KeyValueCollection>> {
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| anyhow::anyhow!("Key-value store lock poisoned"))?;
        if let Some(collection) = collections.get(name) {
            return Ok(Arc::clone(collection));
        }

        let collection: Arc<dyn KeyValueCollection> = match &self.keyspace {
            Some(keyspace) => {
                let partition = keyspace
                    .open_partition(name, PartitionCreateOptions::default())
                    .with_context(|| format!("Failed to open collection: {name}"))?;
                Arc::new(DiskCollection::new(keyspace.clone(), partition))
            }
            None => Arc::new(MemoryCollection::new()),
        };
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }
}

/// Serializes `value` as pretty JSON into a temporary file next to `path`
/// and atomically renames it over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut temp, value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_collections_are_shared_by_name() {
        let store = KeyValueStore::in_memory();
        let first = store.collection("portfolios").unwrap();
        first.put(b"key", b"value").await.unwrap();

        let second = store.collection("portfolios").unwrap();
        assert_eq!(second.get(b"key").await.unwrap(), Some(b"value".to_vec()));

        let other = store.collection("other").unwrap();
        assert!(other.get(b"key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disk_store_collection() {
        let dir = TempDir::new().unwrap();
        let store = KeyValueStore::open(dir.path()).unwrap();
        let collection = store.collection("portfolios").unwrap();
        collection.put(b"user:1", b"{}").await.unwrap();

        let again = store.collection("portfolios").unwrap();
        assert_eq!(again.get(b"user:1").await.unwrap(), Some(b"{}".to_vec()));
        assert!(dir.path().join("kv").exists());
    }

    #[test]
    fn test_write_json_atomic_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("data.json");

        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<i32> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, vec![4]);

        // No temporary files are left behind
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }
}

use super::KeyValueCollection;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory collection implementation using a HashMap behind a mutex
#[derive(Default)]
pub struct MemoryCollection {
    inner: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.lock().await;
        let value = inner.get(key).cloned();
        if value.is_some() {
            debug!("Store HIT for key: {}", String::from_utf8_lossy(key));
        } else {
            debug!("Store MISS for key: {}", String::from_utf8_lossy(key));
        }
        Ok(value)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        debug!("Store PUT for key: {}", String::from_utf8_lossy(key));
        inner.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.remove(key);
        debug!("Store REMOVE for key: {}", String::from_utf8_lossy(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_collection_get_put() {
        let collection = MemoryCollection::new();

        // Initially, collection is empty
        assert!(collection.get(b"key1").await.unwrap().is_none());

        collection.put(b"key1", b"123").await.unwrap();
        assert_eq!(collection.get(b"key1").await.unwrap(), Some(b"123".to_vec()));

        // Overwrite keeps the latest value
        collection.put(b"key1", b"456").await.unwrap();
        assert_eq!(collection.get(b"key1").await.unwrap(), Some(b"456".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_collection_remove() {
        let collection = MemoryCollection::new();

        collection.put(b"key1", b"123").await.unwrap();
        collection.remove(b"key1").await.unwrap();
        assert!(collection.get(b"key1").await.unwrap().is_none());
    }
}

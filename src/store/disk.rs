use super::KeyValueCollection;
use anyhow::Result;
use async_trait::async_trait;
use fjall::{Keyspace, PartitionHandle, PersistMode};
use tracing::debug;

/// A collection stored in a `fjall` partition. Every write is synced to disk
/// before returning.
pub struct DiskCollection {
    keyspace: Keyspace,
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(keyspace: Keyspace, partition: PartitionHandle) -> Self {
        Self {
            keyspace,
            partition,
        }
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.partition.get(key)?.map(|v| v.to_vec());
        debug!(
            "Store {} for key: {}",
            if value.is_some() { "HIT" } else { "MISS" },
            String::from_utf8_lossy(key)
        );
        Ok(value)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.partition.insert(key, value)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!("Store PUT for key: {}", String::from_utf8_lossy(key));
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> Result<()> {
        self.partition.remove(key)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!("Store REMOVE for key: {}", String::from_utf8_lossy(key));
        Ok(())
    }
}

//! In-memory store

use std::{
    collections::HashMap,
    sync::RwLock,
};

use async_trait::async_trait;

use crate::{BatchOperation, Error, StorageBatch, Store};

/// An in-memory [`Store`] backed by a hash map.
///
/// Useful for tests and for tries that never outlive the process. Values
/// are owned copies; `get` clones on the way out.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or(0)
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> Error {
    Error::StorageError("memory store lock poisoned".to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let data = self.data.read().map_err(|_| poisoned())?;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), Error> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        data.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &[u8]) -> Result<bool, Error> {
        let data = self.data.read().map_err(|_| poisoned())?;
        Ok(data.contains_key(key))
    }

    async fn batch(&self, batch: StorageBatch) -> Result<(), Error> {
        // A single write lock over the whole group makes it atomic with
        // respect to other store users.
        let mut data = self.data.write().map_err(|_| poisoned())?;
        for op in batch {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

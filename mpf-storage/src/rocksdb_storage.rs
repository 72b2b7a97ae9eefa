//! Storage implementation using RocksDB

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use rocksdb::{Options, WriteBatch, DB};
use tokio::task;

use crate::{BatchOperation, Error, StorageBatch, Store};

/// A durable [`Store`] backed by RocksDB.
///
/// Nodes live in the default column family keyed by their hash; the root
/// pointer shares the same keyspace under its reserved key. RocksDB write
/// batches give [`Store::batch`] its atomicity.
///
/// RocksDB's API is blocking, so every call runs on the tokio blocking
/// pool; the async methods suspend on the spawned task rather than
/// stalling the executor for the duration of the disk I/O.
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Opens (creating if missing) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl std::fmt::Debug for RocksDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbStore")
            .field("path", &self.db.path())
            .finish()
    }
}

fn join_error(error: task::JoinError) -> Error {
    Error::StorageError(format!("rocksdb task failed: {error}"))
}

#[async_trait]
impl Store for RocksDbStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let db = Arc::clone(&self.db);
        let key = key.to_vec();
        task::spawn_blocking(move || db.get(key))
            .await
            .map_err(join_error)?
            .map_err(Error::from)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let db = Arc::clone(&self.db);
        let key = key.to_vec();
        let value = value.to_vec();
        task::spawn_blocking(move || db.put(key, value))
            .await
            .map_err(join_error)?
            .map_err(Error::from)
    }

    async fn delete(&self, key: &[u8]) -> Result<(), Error> {
        let db = Arc::clone(&self.db);
        let key = key.to_vec();
        task::spawn_blocking(move || db.delete(key))
            .await
            .map_err(join_error)?
            .map_err(Error::from)
    }

    async fn exists(&self, key: &[u8]) -> Result<bool, Error> {
        let db = Arc::clone(&self.db);
        let key = key.to_vec();
        task::spawn_blocking(move || db.get_pinned(key).map(|found| found.is_some()))
            .await
            .map_err(join_error)?
            .map_err(Error::from)
    }

    async fn batch(&self, batch: StorageBatch) -> Result<(), Error> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let mut write_batch = WriteBatch::default();
            for op in batch {
                match op {
                    BatchOperation::Put { key, value } => write_batch.put(key, value),
                    BatchOperation::Delete { key } => write_batch.delete(key),
                }
            }
            db.write(write_batch)
        })
        .await
        .map_err(join_error)?
        .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let dir = TempDir::new().expect("cannot create tempdir");
        let store = RocksDbStore::open(dir.path()).expect("cannot open db");

        store.put(b"k", b"v").await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.exists(b"k").await.unwrap());
        assert!(!store.exists(b"missing").await.unwrap());

        store.delete(b"k").await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn batch_is_atomic_group() {
        let dir = TempDir::new().expect("cannot create tempdir");
        let store = RocksDbStore::open(dir.path()).expect("cannot open db");

        store.put(b"stale", b"x").await.unwrap();

        let mut batch = StorageBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"stale".to_vec());
        store.batch(batch).await.unwrap();

        assert_eq!(store.get(b"a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"stale").await.unwrap(), None);
    }
}

//! Abstract persistent storage.
//!
//! A key/value store with one namespace per table. Values are opaque byte
//! records; anything secret is encrypted by the caller before it gets here
//! (the safe envelope, resource-key cache entries), so a storage backend
//! never sees plaintext key material.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// The tables the session persists into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// The encrypted local safe (singleton record).
    DeviceKeys,
    /// Encrypted resource-key cache entries, keyed by resource id.
    ResourceKeys,
    /// Verified user snapshots, for backends that persist state.
    Users,
    /// Verified group snapshots, for backends that persist state.
    Groups,
    /// Chain metadata (last verified index).
    Trustchain,
    /// Serialized blocks pending verification, keyed by subject.
    Unverified,
}

/// Errors from a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend failed to read or write.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Key/value storage with per-table namespaces.
pub trait Storage: Send + Sync + 'static {
    /// Read one record.
    fn get(
        &self,
        table: Table,
        key: &[u8],
    ) -> impl Future<Output = Result<Option<Vec<u8>>, StorageError>> + Send;

    /// Write one record, replacing any previous value.
    fn put(
        &self,
        table: Table,
        key: &[u8],
        value: &[u8],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Delete one record; deleting a missing record is a no-op.
    fn delete(
        &self,
        table: Table,
        key: &[u8],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// All records of a table in key order.
    fn find(
        &self,
        table: Table,
    ) -> impl Future<Output = Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>> + Send;

    /// Drop every record of a table.
    fn clear(&self, table: Table) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Drop everything; used when the local device is revoked.
    fn clear_all(&self) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// In-memory storage for tests and simulation.
///
/// All state sits behind one mutex; operations complete immediately. Clone
/// shares the underlying store.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<HashMap<Table, BTreeMap<Vec<u8>, Vec<u8>>>>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Table, BTreeMap<Vec<u8>, Vec<u8>>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Storage for MemoryStorage {
    async fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock().get(&table).and_then(|rows| rows.get(key).cloned()))
    }

    async fn put(&self, table: Table, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.lock().entry(table).or_default().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, table: Table, key: &[u8]) -> Result<(), StorageError> {
        if let Some(rows) = self.lock().get_mut(&table) {
            rows.remove(key);
        }
        Ok(())
    }

    async fn find(&self, table: Table) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        Ok(self
            .lock()
            .get(&table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn clear(&self, table: Table) -> Result<(), StorageError> {
        self.lock().remove(&table);
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.lock().clear();
        Ok(())
    }
}

//! Resource-key cache and resolution sharing.
//!
//! The cache holds keys this device has personally seen (issued on encrypt
//! or recovered from a key publish), each entry encrypted under the user
//! secret before it reaches storage. It never caches on behalf of group
//! siblings: only a successful local decrypt writes through.
//!
//! At most one resolution runs per resource id; concurrent callers await
//! the same in-flight attempt instead of walking the chain twice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use sealchain_crypto::{aead, SymmetricKey};
use sealchain_proto::ResourceId;
use tokio::sync::{Mutex, OnceCell};

use crate::error::SessionError;
use crate::storage::{Storage, Table};

type ResolutionCell = Arc<OnceCell<Option<SymmetricKey>>>;

/// Issues new resource keys and resolves known ones.
pub struct ResourceKeyManager<S: Storage> {
    storage: Arc<S>,
    user_secret: [u8; 32],
    in_flight: Mutex<HashMap<ResourceId, ResolutionCell>>,
}

impl<S: Storage> ResourceKeyManager<S> {
    /// Manager writing encrypted cache entries through `storage`.
    pub fn new(storage: Arc<S>, user_secret: [u8; 32]) -> Self {
        Self { storage, user_secret, in_flight: Mutex::new(HashMap::new()) }
    }

    /// Issue a fresh resource key with its id.
    pub fn new_resource_key(&self) -> (SymmetricKey, ResourceId) {
        let key = SymmetricKey::generate();
        let resource_id = ResourceId(aead::marker_mac(&key));
        (key, resource_id)
    }

    /// Cache a key this device legitimately holds.
    pub async fn store_key(
        &self,
        resource_id: ResourceId,
        key: &SymmetricKey,
    ) -> Result<(), SessionError> {
        let record = aead::encrypt(&SymmetricKey(self.user_secret), key.as_bytes());
        self.storage.put(Table::ResourceKeys, resource_id.as_bytes(), &record).await?;
        Ok(())
    }

    /// Find the key for a resource: cache first, then the caller-provided
    /// chain resolution, writing a hit through to the cache.
    ///
    /// Concurrent calls for the same id share one resolution.
    ///
    /// # Errors
    ///
    /// Whatever `resolve` surfaces; a cache entry that fails to decrypt is
    /// an [`SessionError::InternalError`] (the cache is written by us).
    pub async fn find_key<F, Fut>(
        &self,
        resource_id: ResourceId,
        resolve: F,
    ) -> Result<Option<SymmetricKey>, SessionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<SymmetricKey>, SessionError>>,
    {
        if let Some(cached) = self.cached_key(&resource_id).await? {
            return Ok(Some(cached));
        }

        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(resource_id).or_default())
        };

        let result = cell
            .get_or_try_init(|| async {
                let resolved = resolve().await?;
                if let Some(key) = &resolved {
                    self.store_key(resource_id, key).await?;
                }
                Ok::<_, SessionError>(resolved)
            })
            .await
            .map(|value| value.clone());

        self.in_flight.lock().await.remove(&resource_id);
        result
    }

    /// Drop every cached key; used when the local device is revoked.
    pub async fn wipe(&self) -> Result<(), SessionError> {
        self.storage.clear(Table::ResourceKeys).await?;
        Ok(())
    }

    async fn cached_key(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<SymmetricKey>, SessionError> {
        let Some(record) = self.storage.get(Table::ResourceKeys, resource_id.as_bytes()).await?
        else {
            return Ok(None);
        };
        let bytes = aead::decrypt(&SymmetricKey(self.user_secret), &record)
            .map_err(|_| SessionError::InternalError("resource-key cache corrupt".into()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SessionError::InternalError("resource-key cache corrupt".into()))?;
        Ok(Some(SymmetricKey(key)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::storage::MemoryStorage;

    fn manager() -> ResourceKeyManager<MemoryStorage> {
        ResourceKeyManager::new(Arc::new(MemoryStorage::new()), [9u8; 32])
    }

    #[tokio::test]
    async fn issued_ids_are_deterministic_per_key() {
        let manager = manager();
        let (key, resource_id) = manager.new_resource_key();
        assert_eq!(resource_id, ResourceId(aead::marker_mac(&key)));
        let (_, other_id) = manager.new_resource_key();
        assert_ne!(resource_id, other_id);
    }

    #[tokio::test]
    async fn store_then_find_hits_cache_without_resolution() {
        let manager = manager();
        let (key, resource_id) = manager.new_resource_key();
        manager.store_key(resource_id, &key).await.unwrap();

        let found = manager
            .find_key(resource_id, || async { panic!("cache hit must not resolve") })
            .await
            .unwrap();
        assert_eq!(found, Some(key));
    }

    #[tokio::test]
    async fn resolution_writes_through() {
        let manager = manager();
        let (key, resource_id) = manager.new_resource_key();

        let resolved_key = key.clone();
        let found = manager
            .find_key(resource_id, move || async move { Ok(Some(resolved_key)) })
            .await
            .unwrap();
        assert_eq!(found, Some(key.clone()));

        // Second lookup must come from the cache.
        let found = manager
            .find_key(resource_id, || async { panic!("cache hit must not resolve") })
            .await
            .unwrap();
        assert_eq!(found, Some(key));
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_resolution() {
        let manager = Arc::new(manager());
        let (key, resource_id) = manager.new_resource_key();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let calls = Arc::clone(&calls);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .find_key(resource_id, move || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            Ok(Some(key))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(key.clone()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_is_not_cached() {
        let manager = manager();
        let (_, resource_id) = manager.new_resource_key();

        let found = manager.find_key(resource_id, || async { Ok(None) }).await.unwrap();
        assert_eq!(found, None);

        // A later resolution can still succeed.
        let (key, _) = manager.new_resource_key();
        let resolved = key.clone();
        let found = manager
            .find_key(resource_id, move || async move { Ok(Some(resolved)) })
            .await
            .unwrap();
        assert_eq!(found, Some(key));
    }

    #[tokio::test]
    async fn wipe_clears_cache() {
        let manager = manager();
        let (key, resource_id) = manager.new_resource_key();
        manager.store_key(resource_id, &key).await.unwrap();
        manager.wipe().await.unwrap();

        let found = manager.find_key(resource_id, || async { Ok(None) }).await.unwrap();
        assert_eq!(found, None);
    }
}

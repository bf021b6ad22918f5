//! Cache store boundary and the in-memory reference store.
//!
//! A store is a byte-oriented key/value map. "Not found" is reported as
//! `Ok(None)` so it can never be confused with a store-level failure.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use larder_core::StoreError;

/// Byte-oriented cache store.
///
/// Implementations must be safe to call concurrently from many worker
/// tasks; the adapter does not serialize access.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read the bytes stored under `key`, or `None` if nothing is stored.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `bytes` under `key`, replacing any previous value.
    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Delete the value under `key`. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory cache store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.read().map_err(|_| StoreError::LockPoisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// True if a value is stored under `key`.
    pub fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .contains_key(key))
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .clear();
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let store = InMemoryCacheStore::new();
        assert_eq!(store.read("nope").await.unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let store = InMemoryCacheStore::new();
        store.write("k", b"one".to_vec()).await.unwrap();
        store.write("k", b"two".to_vec()).await.unwrap();

        assert_eq!(store.read("k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = InMemoryCacheStore::new();
        store.write("k", vec![1]).await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();

        assert!(!store.contains("k").unwrap());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryCacheStore::new();
        store.write("a", vec![1]).await.unwrap();
        store.write("b", vec![2]).await.unwrap();
        store.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_poisoned_lock_is_reported_everywhere() {
        let store = Arc::new(InMemoryCacheStore::new());
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert_eq!(store.len(), Err(StoreError::LockPoisoned));
        assert_eq!(store.is_empty(), Err(StoreError::LockPoisoned));
        assert_eq!(store.contains("k"), Err(StoreError::LockPoisoned));
        assert_eq!(store.clear(), Err(StoreError::LockPoisoned));
    }
}

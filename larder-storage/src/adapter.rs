//! Typed record access on top of a byte store.
//!
//! Records are JSON-encoded [`CacheRecord`]s. Collections are stored as one
//! record per member (keyed by [`Providable::identifier`]) plus an index
//! record under the collection key listing member keys in order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use larder_core::{
    CacheReadError, CacheRecord, CollectionIndex, PartialFailure, Providable, StoreError,
    Timestamp,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::store::CacheStore;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Records found and decoded.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Successful record writes (members and indexes included).
    pub writes: u64,
    /// Failed record writes.
    pub write_failures: u64,
    /// Collection members that could not be read.
    pub partial_failures: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    partial_failures: AtomicU64,
}

/// Outcome of reading a cached collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRead<T> {
    /// Readable members, in index order.
    pub items: Vec<CacheRecord<T>>,
    /// Members that were missing or undecodable.
    pub failures: Vec<PartialFailure>,
    /// Expiration of the index record itself.
    pub index_expiration: Option<Timestamp>,
    /// Whether the first indexed member was readable.
    pub first_member_read: bool,
}

impl<T> CollectionRead<T> {
    /// The expiration that stands for the whole collection.
    ///
    /// That is the first indexed member's expiration when it was read, and
    /// the index's own expiration otherwise (empty collection, or first
    /// member missing or undecodable).
    pub fn sentinel_expiration(&self) -> Option<Timestamp> {
        match self.items.first() {
            Some(first) if self.first_member_read => first.expiration_date,
            _ => self.index_expiration,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of a best-effort collection write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionWriteReport {
    /// Member records written.
    pub members_written: usize,
    /// Members that failed to write, with the store error.
    pub member_failures: Vec<(String, StoreError)>,
    /// Index write failure, if any.
    pub index_failure: Option<StoreError>,
}

impl CollectionWriteReport {
    pub fn is_clean(&self) -> bool {
        self.member_failures.is_empty() && self.index_failure.is_none()
    }
}

/// Reads and writes typed records against a shared [`CacheStore`].
#[derive(Clone)]
pub struct CacheAdapter {
    store: Arc<dyn CacheStore>,
    stats: Arc<StatsInner>,
}

impl CacheAdapter {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            stats: Arc::new(StatsInner::default()),
        }
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Look up a single record.
    ///
    /// Absence is `CacheReadError::NotFound`; store failures are
    /// `CacheReadError::Store`; bytes that do not decode as a record of `T`
    /// are `CacheReadError::Corrupt`.
    pub async fn read_item<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<CacheRecord<T>, CacheReadError> {
        let bytes = match self.store.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return Err(CacheReadError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(CacheReadError::from_store(key, &e)),
        };

        let record = serde_json::from_slice::<CacheRecord<T>>(&bytes).map_err(|e| {
            CacheReadError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Ok(record)
    }

    /// Write a single record, overwriting whatever is stored under `key`.
    pub async fn write_item<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        expiration: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        let record = CacheRecord::new(value, expiration);
        let result = self.write_record(key, &record).await;
        self.count_write(&result);
        result
    }

    /// Assemble a cached collection from its index.
    ///
    /// A missing or unreadable index fails the whole read. Missing or
    /// undecodable members are collected as [`PartialFailure`]s and left out
    /// of `items`.
    pub async fn read_collection<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<CollectionRead<T>, CacheReadError> {
        let index: CollectionIndex = self.read_item(key).await?;

        let mut items = Vec::with_capacity(index.item.len());
        let mut failures = Vec::new();
        let mut first_member_read = false;
        for (position, member_key) in index.item.into_iter().enumerate() {
            match self.read_item::<T>(&member_key).await {
                Ok(record) => {
                    first_member_read |= position == 0;
                    items.push(record);
                }
                Err(cause) => {
                    tracing::debug!(key = %member_key, error = %cause, "Collection member unreadable");
                    failures.push(PartialFailure::new(member_key, cause));
                }
            }
        }

        self.stats
            .partial_failures
            .fetch_add(failures.len() as u64, Ordering::Relaxed);
        Ok(CollectionRead {
            items,
            failures,
            index_expiration: index.expiration_date,
            first_member_read,
        })
    }

    /// Write every member under its identifier, then replace the index.
    ///
    /// Best-effort: a member failure neither stops the remaining members nor
    /// the index write.
    pub async fn write_collection<T: Providable>(
        &self,
        key: &str,
        values: &[T],
        expiration: Option<Timestamp>,
    ) -> CollectionWriteReport {
        let mut report = CollectionWriteReport::default();
        let mut member_keys = Vec::with_capacity(values.len());

        for value in values {
            let member_key = value.identifier();
            match self.write_item(&member_key, value, expiration).await {
                Ok(()) => report.members_written += 1,
                Err(e) => report.member_failures.push((member_key.clone(), e)),
            }
            member_keys.push(member_key);
        }

        if let Err(e) = self.write_item(key, &member_keys, expiration).await {
            report.index_failure = Some(e);
        }
        report
    }

    /// Delete a single record.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(key).await
    }

    /// Snapshot of the adapter's counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            write_failures: self.stats.write_failures.load(Ordering::Relaxed),
            partial_failures: self.stats.partial_failures.load(Ordering::Relaxed),
        }
    }

    async fn write_record<T: Serialize + Sync>(
        &self,
        key: &str,
        record: &CacheRecord<&T>,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(|e| StoreError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.store.write(key, bytes).await
    }

    fn count_write(&self, result: &Result<(), StoreError>) {
        let counter = match result {
            Ok(()) => &self.stats.writes,
            Err(_) => &self.stats.write_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for CacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAdapter")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCacheStore;
    use chrono::Utc;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Article {
        id: String,
        title: String,
    }

    impl Providable for Article {
        fn identifier(&self) -> String {
            self.id.clone()
        }
    }

    fn article(id: &str) -> Article {
        Article {
            id: id.to_string(),
            title: format!("Title {}", id),
        }
    }

    fn adapter() -> (Arc<InMemoryCacheStore>, CacheAdapter) {
        let store = Arc::new(InMemoryCacheStore::new());
        let adapter = CacheAdapter::new(store.clone());
        (store, adapter)
    }

    #[tokio::test]
    async fn test_read_item_not_found() {
        let (_, adapter) = adapter();
        let err = adapter.read_item::<Article>("missing").await.unwrap_err();
        assert_eq!(
            err,
            CacheReadError::NotFound {
                key: "missing".to_string()
            }
        );
        assert_eq!(adapter.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_write_then_read_item() {
        let (_, adapter) = adapter();
        let expiration = Some(Utc::now());
        adapter
            .write_item("article-a", &article("a"), expiration)
            .await
            .unwrap();

        let record = adapter.read_item::<Article>("article-a").await.unwrap();
        assert_eq!(record.item, article("a"));
        assert_eq!(record.expiration_date, expiration);
        assert_eq!(adapter.stats().hits, 1);
        assert_eq!(adapter.stats().writes, 1);
    }

    #[tokio::test]
    async fn test_corrupt_item() {
        let (store, adapter) = adapter();
        store.write("bad", b"not json".to_vec()).await.unwrap();

        let err = adapter.read_item::<Article>("bad").await.unwrap_err();
        assert!(matches!(err, CacheReadError::Corrupt { ref key, .. } if key == "bad"));
    }

    #[tokio::test]
    async fn test_read_collection_missing_index() {
        let (_, adapter) = adapter();
        let err = adapter
            .read_collection::<Article>("articles")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_collection_roundtrip_keeps_order() {
        let (store, adapter) = adapter();
        let values = vec![article("c"), article("a"), article("b")];

        let report = adapter.write_collection("articles", &values, None).await;
        assert!(report.is_clean());
        assert_eq!(report.members_written, 3);
        assert_eq!(store.len().unwrap(), 4);

        let read = adapter.read_collection::<Article>("articles").await.unwrap();
        assert!(read.is_complete());
        let items: Vec<Article> = read.items.into_iter().map(|r| r.item).collect();
        assert_eq!(items, values);
    }

    #[tokio::test]
    async fn test_collection_missing_member_recorded() {
        let (store, adapter) = adapter();
        let values = vec![article("a"), article("b"), article("c")];
        adapter.write_collection("articles", &values, None).await;
        store.remove("b").await.unwrap();
        store.write("c", b"{".to_vec()).await.unwrap();

        let read = adapter.read_collection::<Article>("articles").await.unwrap();
        assert_eq!(read.items.len(), 1);
        assert_eq!(read.failures.len(), 2);
        assert_eq!(read.failures[0].key, "b");
        assert!(read.failures[0].cause.is_not_found());
        assert!(matches!(read.failures[1].cause, CacheReadError::Corrupt { .. }));
        assert!(read.first_member_read);
        assert_eq!(adapter.stats().partial_failures, 2);
    }

    #[tokio::test]
    async fn test_sentinel_falls_back_to_index_expiration() {
        let (store, adapter) = adapter();
        let member = Utc::now() + chrono::Duration::seconds(60);
        let values = vec![article("a"), article("b")];
        adapter
            .write_collection("articles", &values, Some(member))
            .await;

        // Re-write the index alone with its own expiration.
        let index_expiration = Some(Utc::now() - chrono::Duration::seconds(60));
        adapter
            .write_item("articles", &vec!["a".to_string(), "b".to_string()], index_expiration)
            .await
            .unwrap();

        let read = adapter.read_collection::<Article>("articles").await.unwrap();
        assert_eq!(read.sentinel_expiration(), Some(member));

        // First member gone: the second member does not stand in for it.
        store.remove("a").await.unwrap();
        let read = adapter.read_collection::<Article>("articles").await.unwrap();
        assert!(!read.first_member_read);
        assert_eq!(read.index_expiration, index_expiration);
        assert_eq!(read.sentinel_expiration(), index_expiration);
    }

    #[tokio::test]
    async fn test_empty_collection_uses_index_expiration() {
        let (_, adapter) = adapter();
        let expiration = Some(Utc::now());
        adapter
            .write_collection::<Article>("articles", &[], expiration)
            .await;

        let read = adapter.read_collection::<Article>("articles").await.unwrap();
        assert!(read.items.is_empty());
        assert_eq!(read.sentinel_expiration(), expiration);
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, adapter) = adapter();
        adapter.write_item("k", &1u32, None).await.unwrap();
        adapter.remove("k").await.unwrap();
        assert!(!store.contains("k").unwrap());
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }
}

//! Collection reconstruction from cached indexes.
//!
//! A collection's freshness is judged by its first indexed member (the
//! sentinel), or by the index record when that member cannot be read or the
//! collection is empty. A collection with any unreadable member is never served from
//! cache alone; what could be read is kept aside so a failed remote refresh
//! can still hand it back inside `ProviderError::PartialRetrieval`.

use larder_core::{PartialFailure, ProviderError, Timestamp};
use larder_storage::{CacheAdapter, CollectionRead};
use serde::de::DeserializeOwned;

use crate::policy::{CacheState, RetrievalDecision, RetrievalPolicy};

/// What the cache holds for a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionCache<T> {
    /// Index missing or unreadable.
    Absent,
    /// Every indexed member was read.
    Complete {
        items: Vec<T>,
        sentinel_expiration: Option<Timestamp>,
    },
    /// Some members were missing or undecodable.
    Partial {
        items: Vec<T>,
        failures: Vec<PartialFailure>,
        sentinel_expiration: Option<Timestamp>,
    },
}

/// Items salvaged from a partially readable collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Salvage<T> {
    pub items: Vec<T>,
    pub failures: Vec<PartialFailure>,
    pub sentinel_stale: bool,
}

impl<T> Salvage<T> {
    /// Fold a remote failure together with the salvaged items.
    ///
    /// A stale sentinel under a no-stale request surfaces the plain remote
    /// error so stale partial data never reaches the caller.
    pub fn fold(self, underlying: ProviderError, allow_stale: bool) -> ProviderError<T> {
        if self.sentinel_stale && !allow_stale {
            return underlying.widen();
        }
        ProviderError::PartialRetrieval {
            retrieved_items: self.items,
            failures: self.failures,
            underlying: Box::new(underlying),
        }
    }
}

/// How a collection retrieval proceeds.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionPlan<T> {
    CacheOnly(Vec<T>),
    RemoteOnly { salvage: Option<Salvage<T>> },
    StaleThenRemote(Vec<T>),
}

/// Builds [`CollectionCache`] values from the cache adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionAssembler;

impl CollectionAssembler {
    /// Read the collection index at `key` and its members.
    pub async fn assemble<T: DeserializeOwned + Send>(
        adapter: &CacheAdapter,
        key: &str,
    ) -> CollectionCache<T> {
        match adapter.read_collection::<T>(key).await {
            Ok(read) => Self::from_read(read),
            Err(e) => {
                tracing::debug!(key, error = %e, "Collection index unavailable, treating as absent");
                CollectionCache::Absent
            }
        }
    }

    /// Classify an adapter read.
    pub fn from_read<T>(read: CollectionRead<T>) -> CollectionCache<T> {
        let sentinel_expiration = read.sentinel_expiration();
        let items = read.items.into_iter().map(|r| r.item).collect();

        if read.failures.is_empty() {
            CollectionCache::Complete {
                items,
                sentinel_expiration,
            }
        } else {
            CollectionCache::Partial {
                items,
                failures: read.failures,
                sentinel_expiration,
            }
        }
    }
}

impl<T> CollectionCache<T> {
    /// Freshness of the collection as judged by its sentinel.
    pub fn state(&self, now: Timestamp) -> CacheState {
        match self {
            Self::Absent => CacheState::Absent,
            Self::Complete {
                sentinel_expiration,
                ..
            }
            | Self::Partial {
                sentinel_expiration,
                ..
            } => CacheState::classify(Some(*sentinel_expiration), now),
        }
    }

    /// Decide how to proceed, attaching whatever the plan needs.
    pub fn plan(self, allow_stale: bool, now: Timestamp) -> CollectionPlan<T> {
        let state = self.state(now);
        match self {
            Self::Absent => CollectionPlan::RemoteOnly { salvage: None },
            Self::Complete { items, .. } => match RetrievalPolicy::decide(state, allow_stale) {
                RetrievalDecision::CacheOnly => CollectionPlan::CacheOnly(items),
                RetrievalDecision::StaleThenRemote => CollectionPlan::StaleThenRemote(items),
                RetrievalDecision::RemoteOnly => CollectionPlan::RemoteOnly { salvage: None },
            },
            Self::Partial {
                items, failures, ..
            } => CollectionPlan::RemoteOnly {
                salvage: Some(Salvage {
                    items,
                    failures,
                    sentinel_stale: state == CacheState::Stale,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use larder_core::{CacheReadError, CacheRecord, TransportError};

    fn failure(key: &str) -> PartialFailure {
        PartialFailure::new(
            key,
            CacheReadError::NotFound {
                key: key.to_string(),
            },
        )
    }

    fn read(
        items: Vec<(&'static str, Option<Timestamp>)>,
        failures: Vec<PartialFailure>,
    ) -> CollectionRead<&'static str> {
        CollectionRead {
            first_member_read: !items.is_empty(),
            items: items
                .into_iter()
                .map(|(item, exp)| CacheRecord::new(item, exp))
                .collect(),
            failures,
            index_expiration: None,
        }
    }

    #[test]
    fn test_complete_fresh_is_cache_only() {
        let now = Utc::now();
        let cache = CollectionAssembler::from_read(read(vec![("a", None), ("b", None)], vec![]));
        assert_eq!(cache.plan(false, now), CollectionPlan::CacheOnly(vec!["a", "b"]));
    }

    #[test]
    fn test_sentinel_decides_staleness() {
        let now = Utc::now();
        let past = Some(now - Duration::seconds(10));
        let future = Some(now + Duration::seconds(10));

        // First member stale, second fresh: the whole collection is stale.
        let cache = CollectionAssembler::from_read(read(vec![("a", past), ("b", future)], vec![]));
        assert_eq!(cache.state(now), CacheState::Stale);
        assert_eq!(
            cache.clone().plan(true, now),
            CollectionPlan::StaleThenRemote(vec!["a", "b"])
        );
        assert_eq!(cache.plan(false, now), CollectionPlan::RemoteOnly { salvage: None });

        // First member fresh, second stale: the whole collection is fresh.
        let cache = CollectionAssembler::from_read(read(vec![("a", future), ("b", past)], vec![]));
        assert_eq!(cache.state(now), CacheState::Fresh);
    }

    #[test]
    fn test_partial_always_goes_remote() {
        let now = Utc::now();
        let cache = CollectionAssembler::from_read(read(vec![("a", None)], vec![failure("b")]));
        match cache.plan(false, now) {
            CollectionPlan::RemoteOnly {
                salvage: Some(salvage),
            } => {
                assert_eq!(salvage.items, vec!["a"]);
                assert_eq!(salvage.failures, vec![failure("b")]);
                assert!(!salvage.sentinel_stale);
            }
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn test_salvage_folds_into_partial_retrieval() {
        let salvage = Salvage {
            items: vec!["a", "c"],
            failures: vec![failure("b")],
            sentinel_stale: false,
        };
        let underlying = ProviderError::Network(TransportError::Status {
            code: 404,
            message: "Not Found".to_string(),
        });

        match salvage.fold(underlying.clone(), false) {
            ProviderError::PartialRetrieval {
                retrieved_items,
                failures,
                underlying: inner,
            } => {
                assert_eq!(retrieved_items, vec!["a", "c"]);
                assert_eq!(failures.len(), 1);
                assert_eq!(*inner, underlying);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_stale_salvage_withheld_when_stale_disallowed() {
        let salvage = Salvage {
            items: vec!["a"],
            failures: vec![failure("b")],
            sentinel_stale: true,
        };
        let underlying = ProviderError::Network(TransportError::Timeout);

        assert_eq!(
            salvage.clone().fold(underlying.clone(), false),
            ProviderError::Network(TransportError::Timeout)
        );
        assert!(salvage.fold(underlying, true).is_partial());
    }

    #[test]
    fn test_all_members_failed_uses_index_expiration() {
        let now = Utc::now();
        let cache: CollectionCache<&str> = CollectionAssembler::from_read(CollectionRead {
            items: vec![],
            failures: vec![failure("a"), failure("b")],
            index_expiration: Some(now - Duration::seconds(10)),
            first_member_read: false,
        });
        assert_eq!(cache.state(now), CacheState::Stale);
        assert!(matches!(
            cache.plan(false, now),
            CollectionPlan::RemoteOnly { salvage: Some(ref s) }
                if s.items.is_empty() && s.failures.len() == 2 && s.sentinel_stale
        ));
    }

    #[test]
    fn test_missing_first_member_defers_to_index() {
        let now = Utc::now();
        let cache = CollectionAssembler::from_read(CollectionRead {
            items: vec![CacheRecord::new("b", Some(now + Duration::seconds(10)))],
            failures: vec![failure("a")],
            index_expiration: Some(now - Duration::seconds(10)),
            first_member_read: false,
        });
        assert_eq!(cache.state(now), CacheState::Stale);
    }

    #[test]
    fn test_expired_empty_collection_is_stale() {
        let now = Utc::now();
        let cache: CollectionCache<&str> = CollectionAssembler::from_read(CollectionRead {
            items: vec![],
            failures: vec![],
            index_expiration: Some(now - Duration::seconds(10)),
            first_member_read: false,
        });
        assert_eq!(cache.plan(false, now), CollectionPlan::RemoteOnly { salvage: None });
    }
}

//! Cached record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CacheReadError;

/// A cached value plus an optional expiration timestamp.
///
/// A record without an expiration date never goes stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    pub item: T,
    pub expiration_date: Option<DateTime<Utc>>,
}

impl<T> CacheRecord<T> {
    /// Create a record that expires at the given instant.
    pub fn new(item: T, expiration_date: Option<DateTime<Utc>>) -> Self {
        Self {
            item,
            expiration_date,
        }
    }

    /// Create a record that never expires.
    pub fn permanent(item: T) -> Self {
        Self::new(item, None)
    }

    /// True iff an expiration is set and lies strictly before `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.expiration_date, now)
    }

    /// Negation of [`CacheRecord::is_stale`].
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.is_stale(now)
    }

    /// Consume the record and return the cached value.
    pub fn into_item(self) -> T {
        self.item
    }

    /// Map the inner value, keeping the expiration.
    pub fn map<U, F>(self, f: F) -> CacheRecord<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRecord {
            item: f(self.item),
            expiration_date: self.expiration_date,
        }
    }
}

/// Staleness rule shared by records and collection sentinels.
pub fn is_expired(expiration_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expiration_date, Some(expiration) if expiration < now)
}

/// Ordered member keys of a cached collection.
///
/// Stored under the collection's persistence key as a `CacheRecord` and
/// rewritten in full on every remote refresh.
pub type CollectionIndex = CacheRecord<Vec<String>>;

/// One collection member that could not be read from cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFailure {
    pub key: String,
    pub cause: CacheReadError,
}

impl PartialFailure {
    pub fn new(key: impl Into<String>, cause: CacheReadError) -> Self {
        Self {
            key: key.into(),
            cause,
        }
    }
}

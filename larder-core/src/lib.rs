//! Larder Core - Retrieval Data Model
//!
//! Records, request contract, configuration and the retrieval error
//! taxonomy. This crate performs no I/O; storage and orchestration crates
//! build on it.

pub mod config;
pub mod error;
pub mod record;
pub mod request;

pub use config::ProviderConfig;
pub use error::{
    CacheReadError, ConfigError, DecodeError, ProviderError, StoreError, TransportError,
};
pub use record::{is_expired, CacheRecord, CollectionIndex, PartialFailure};
pub use request::{HttpMethod, Providable, ProviderRequest, RemoteRequest};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Expiration for a record written at `now` with the given TTL.
pub fn expiration_from(now: Timestamp, ttl: Option<std::time::Duration>) -> Option<Timestamp> {
    ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| now.checked_add_signed(ttl))
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::time::Duration;

    proptest! {
        /// Property: a record written with a TTL is fresh at write time and
        /// stale once the TTL has fully elapsed.
        #[test]
        fn prop_ttl_expiration_boundary(ttl_secs in 1u64..1_000_000) {
            let now = Utc::now();
            let expiration = expiration_from(now, Some(Duration::from_secs(ttl_secs)));
            let record = CacheRecord::new((), expiration);

            prop_assert!(record.is_fresh(now));
            let after = now + chrono::Duration::seconds(ttl_secs as i64 + 1);
            prop_assert!(record.is_stale(after));
        }

        /// Property: no TTL means no expiration, which means never stale.
        #[test]
        fn prop_no_ttl_never_stale(offset_days in 0i64..100_000) {
            let now = Utc::now();
            let record = CacheRecord::new((), expiration_from(now, None));
            prop_assert!(record.expiration_date.is_none());
            prop_assert!(record.is_fresh(now + chrono::Duration::days(offset_days)));
        }
    }
}

//! Cache-versus-remote routing decisions.
//!
//! Pure functions with no I/O: given what the cache returned and whether the
//! caller tolerates stale data, decide which sources to consult.

use larder_core::{is_expired, CacheRecord, Timestamp};

/// Freshness of a cache lookup at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheState {
    /// Nothing usable in cache.
    Absent,
    /// Cached and not expired (or never expires).
    Fresh,
    /// Cached with an expiration strictly before now.
    Stale,
}

impl CacheState {
    /// Classify an optional expiration. `None` for `lookup` means absent;
    /// `Some(None)` means present without expiration.
    pub fn classify(lookup: Option<Option<Timestamp>>, now: Timestamp) -> Self {
        match lookup {
            None => Self::Absent,
            Some(expiration) if is_expired(expiration, now) => Self::Stale,
            Some(_) => Self::Fresh,
        }
    }

    /// Classify an optional cached record.
    pub fn of<T>(record: Option<&CacheRecord<T>>, now: Timestamp) -> Self {
        Self::classify(record.map(|r| r.expiration_date), now)
    }
}

/// Which sources a retrieval consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrievalDecision {
    /// Serve the cached value; never touch remote.
    CacheOnly,
    /// Go remote; never emit the cached value.
    RemoteOnly,
    /// Emit the stale cached value, then go remote and emit that as well.
    StaleThenRemote,
}

impl RetrievalDecision {
    pub fn consults_remote(&self) -> bool {
        !matches!(self, Self::CacheOnly)
    }

    pub fn emits_cached(&self) -> bool {
        !matches!(self, Self::RemoteOnly)
    }
}

/// A decision with the cached value it needs attached.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalPlan<T> {
    CacheOnly(T),
    RemoteOnly,
    StaleThenRemote(T),
}

/// Routing rules for cache lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalPolicy;

impl RetrievalPolicy {
    /// Decide which sources to consult.
    pub fn decide(state: CacheState, allow_stale: bool) -> RetrievalDecision {
        match state {
            CacheState::Fresh => RetrievalDecision::CacheOnly,
            CacheState::Stale if allow_stale => RetrievalDecision::StaleThenRemote,
            CacheState::Stale | CacheState::Absent => RetrievalDecision::RemoteOnly,
        }
    }

    /// Decide and attach the cached value when it will be emitted.
    pub fn plan<T>(
        cached: Option<CacheRecord<T>>,
        allow_stale: bool,
        now: Timestamp,
    ) -> RetrievalPlan<T> {
        let decision = Self::decide(CacheState::of(cached.as_ref(), now), allow_stale);
        match (decision, cached) {
            (RetrievalDecision::CacheOnly, Some(record)) => RetrievalPlan::CacheOnly(record.item),
            (RetrievalDecision::StaleThenRemote, Some(record)) => {
                RetrievalPlan::StaleThenRemote(record.item)
            }
            _ => RetrievalPlan::RemoteOnly,
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    proptest! {
        /// Property: the remote is consulted iff the record is absent or
        /// stale, and a stale value is emitted iff stale data is allowed.
        #[test]
        fn prop_decision_table(
            present in any::<bool>(),
            has_expiration in any::<bool>(),
            offset_secs in -10_000i64..10_000,
            allow_stale in any::<bool>(),
        ) {
            let now = Utc::now();
            let expiration = has_expiration.then(|| now + Duration::seconds(offset_secs));
            let lookup = present.then_some(expiration);

            let state = CacheState::classify(lookup, now);
            let decision = RetrievalPolicy::decide(state, allow_stale);

            let stale = present && has_expiration && offset_secs < 0;
            prop_assert_eq!(decision.consults_remote(), !present || stale);
            prop_assert_eq!(decision == RetrievalDecision::StaleThenRemote, stale && allow_stale);
            if present && !has_expiration {
                prop_assert_eq!(decision, RetrievalDecision::CacheOnly);
            }
        }
    }
}

//! Larder Test Utilities
//!
//! Shared test infrastructure for the larder workspace:
//! - Scripted transport and fault-injecting cache store
//! - Recording behavior for hook assertions
//! - Proptest generators and fixtures
//! - Custom assertions for retrieval results

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

pub use larder_core::{
    CacheReadError, CacheRecord, PartialFailure, Providable, ProviderConfig, ProviderError,
    RemoteRequest, StoreError, Timestamp, TransportError,
};
pub use larder_provider::{ItemSource, ProviderBehavior, Response, Transport};
pub use larder_storage::{CacheAdapter, CacheStore, InMemoryCacheStore};

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to debug for the larder crates. Output goes through the
/// test writer so it is captured per test.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("larder_core=debug,larder_storage=debug,larder_provider=debug")
    });
    // A second init in the same process fails; that is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

#[derive(Default)]
struct MockTransportState {
    script: Mutex<VecDeque<Result<Response, TransportError>>>,
    fallback: Mutex<Option<Result<Response, TransportError>>>,
    requests: Mutex<Vec<RemoteRequest>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

/// Scripted transport for [`RemoteRequest`]s.
///
/// Responses are consumed in order; once the script is empty the fallback
/// (if any) answers every call. Clones share state, so a test can keep a
/// clone after handing one to the orchestrator.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockTransportState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response.
    pub fn respond(self, response: Result<Response, TransportError>) -> Self {
        lock(&self.state.script).push_back(response);
        self
    }

    /// Queue a `200` response with `value` encoded as JSON.
    pub fn respond_json<T: serde::Serialize>(self, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        self.respond(Ok(Response::ok(body)))
    }

    /// Queue `count` failures.
    pub fn fail_times(self, count: usize, error: TransportError) -> Self {
        (0..count).fold(self, |mock, _| mock.respond(Err(error.clone())))
    }

    /// Answer every call past the script with `response`.
    pub fn always(self, response: Result<Response, TransportError>) -> Self {
        *lock(&self.state.fallback) = Some(response);
        self
    }

    /// Answer every call past the script with a JSON `200`.
    pub fn always_json<T: serde::Serialize>(self, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        self.always(Ok(Response::ok(body)))
    }

    /// Sleep before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.state.delay) = Some(delay);
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        lock(&self.state.requests).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Request = RemoteRequest;

    async fn send(&self, request: &RemoteRequest) -> Result<Response, TransportError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.requests).push(request.clone());

        let delay = *lock(&self.state.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.state.script).pop_front();
        scripted
            .or_else(|| lock(&self.state.fallback).clone())
            .unwrap_or_else(|| {
                Err(TransportError::Request {
                    reason: format!("no scripted response for {}", request.path),
                })
            })
    }
}

/// Status error shorthand.
pub fn status(code: u16) -> TransportError {
    TransportError::Status {
        code,
        message: format!("HTTP {}", code),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// FAULT-INJECTING STORE
// ============================================================================

/// In-memory store that counts accesses and fails on demand.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryCacheStore,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    unavailable: std::sync::atomic::AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads of `key` fail with an I/O error.
    pub fn fail_reads_for(&self, key: &str) {
        lock(&self.failing_reads).insert(key.to_string());
    }

    /// Make writes of `key` fail with an I/O error.
    pub fn fail_writes_for(&self, key: &str) {
        lock(&self.failing_writes).insert(key.to_string());
    }

    /// Make every operation fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// True if nothing has touched the store.
    pub fn untouched(&self) -> bool {
        self.reads() == 0 && self.writes() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(self.inner.contains(key), Ok(true))
    }

    fn check(&self, key: &str, failing: &Mutex<HashSet<String>>) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "store offline".to_string(),
            });
        }
        if lock(failing).contains(key) {
            return Err(StoreError::Io {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check(key, &self.failing_reads)?;
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(key, &self.failing_writes)?;
        self.inner.write(key, bytes).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check(key, &self.failing_writes)?;
        self.inner.remove(key).await
    }
}

// ============================================================================
// RECORDING BEHAVIOR
// ============================================================================

/// Behavior that records every hook invocation.
#[derive(Debug, Default)]
pub struct RecordingBehavior {
    will: AtomicUsize,
    did: Mutex<Vec<ItemSource>>,
}

impl RecordingBehavior {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn will_count(&self) -> usize {
        self.will.load(Ordering::SeqCst)
    }

    pub fn did_count(&self) -> usize {
        lock(&self.did).len()
    }

    /// Sources passed to `did_provide`, in call order.
    pub fn sources(&self) -> Vec<ItemSource> {
        lock(&self.did).clone()
    }
}

impl<R> ProviderBehavior<R> for RecordingBehavior {
    fn will_provide(&self, _request: &R) {
        self.will.fetch_add(1, Ordering::SeqCst);
    }

    fn did_provide(&self, _item: &dyn std::any::Any, source: ItemSource, _request: &R) {
        lock(&self.did).push(source);
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Common test data.

    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};

    /// Minimal cacheable item.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Article {
        pub id: String,
        pub title: String,
    }

    impl Providable for Article {
        fn identifier(&self) -> String {
            self.id.clone()
        }
    }

    pub fn article(id: &str, title: &str) -> Article {
        Article {
            id: id.to_string(),
            title: title.to_string(),
        }
    }

    /// Articles with the given ids, titled after them.
    pub fn articles(ids: &[&str]) -> Vec<Article> {
        ids.iter()
            .map(|id| article(id, &format!("Title {}", id)))
            .collect()
    }

    /// Expiration one hour ahead.
    pub fn fresh() -> Option<Timestamp> {
        Some(Utc::now() + chrono::Duration::hours(1))
    }

    /// Expiration one hour ago.
    pub fn stale() -> Option<Timestamp> {
        Some(Utc::now() - chrono::Duration::hours(1))
    }

    /// Configuration with no retries and stale serving off.
    pub fn test_config() -> ProviderConfig {
        ProviderConfig::new()
            .with_retry_count(0)
            .with_allow_stale(false)
    }

    /// GET request cached under `key`.
    pub fn keyed_get(path: &str, key: &str) -> RemoteRequest {
        RemoteRequest::get(path).with_persistence_key(key)
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for larder types.

    use super::fixtures::Article;
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    pub fn arb_article() -> impl Strategy<Value = Article> {
        ("[a-z0-9]{1,12}", "[A-Za-z ]{0,32}").prop_map(|(id, title)| Article { id, title })
    }

    /// Articles with pairwise distinct identifiers.
    pub fn arb_articles(max: usize) -> impl Strategy<Value = Vec<Article>> {
        proptest::collection::btree_map("[a-z0-9]{1,12}", "[A-Za-z ]{0,32}", 0..=max).prop_map(
            |entries| {
                entries
                    .into_iter()
                    .map(|(id, title)| Article { id, title })
                    .collect()
            },
        )
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_000_000_000i64..4_000_000_000i64)
            .prop_filter_map("valid timestamp", |secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// An optional expiration; `None` means the record never expires.
    pub fn arb_expiration() -> impl Strategy<Value = Option<Timestamp>> {
        proptest::option::of(arb_timestamp())
    }

    pub fn arb_transport_error() -> impl Strategy<Value = TransportError> {
        prop_oneof![
            "[a-z ]{1,20}".prop_map(|reason| TransportError::Request { reason }),
            (400u16..600).prop_map(status),
            Just(TransportError::Timeout),
            Just(TransportError::EmptyPayload),
        ]
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for retrieval results.

    use super::*;

    /// Assert a partial retrieval with the given counts and return its parts.
    #[track_caller]
    pub fn assert_partial<T: std::fmt::Debug>(
        result: Result<Vec<T>, ProviderError<T>>,
        retrieved: usize,
        failures: usize,
    ) -> (Vec<T>, Vec<PartialFailure>, ProviderError) {
        match result {
            Err(ProviderError::PartialRetrieval {
                retrieved_items,
                failures: failed,
                underlying,
            }) => {
                assert_eq!(retrieved_items.len(), retrieved, "wrong retrieved count");
                assert_eq!(failed.len(), failures, "wrong failure count");
                (retrieved_items, failed, *underlying)
            }
            other => panic!("Expected PartialRetrieval, got: {:?}", other),
        }
    }

    /// Assert the orchestrator was released before delivery.
    #[track_caller]
    pub fn assert_no_live<V: std::fmt::Debug, I: std::fmt::Debug>(
        result: &Result<V, ProviderError<I>>,
    ) {
        match result {
            Err(ProviderError::NoLiveOrchestrator) => {}
            other => panic!("Expected NoLiveOrchestrator, got: {:?}", other),
        }
    }

    /// Assert a network failure.
    #[track_caller]
    pub fn assert_network<V: std::fmt::Debug, I: std::fmt::Debug>(
        result: &Result<V, ProviderError<I>>,
    ) {
        match result {
            Err(ProviderError::Network(_)) => {}
            other => panic!("Expected Network error, got: {:?}", other),
        }
    }
}

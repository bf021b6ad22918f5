//! Retrieval orchestration.
//!
//! The orchestrator is the public entry point. It composes the cache
//! adapter, the routing policy, collection assembly and the remote
//! transport into single-item and collection retrievals.
//!
//! # Execution
//!
//! Every run is a task on the orchestrator's worker runtime. Emissions of
//! one run are produced sequentially by that task and handed to the run's
//! [`NotificationContext`], so a stale emission is always observed before
//! the remote-derived one.
//!
//! # Lifetime
//!
//! Worker tasks keep the collaborators alive but only hold a weak reference
//! to the orchestrator's liveness token. Once the orchestrator is dropped,
//! any emission not yet delivered becomes `ProviderError::NoLiveOrchestrator`.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = RetrievalOrchestrator::builder(store, transport).build()?;
//!
//! let request = RemoteRequest::get("/posts/1").with_persistence_key("post-1");
//! let mut emissions = orchestrator
//!     .retrieve_item::<Post, _>(request, JsonDecoder::new(), RetrieveOptions::new())
//!     .stream();
//!
//! while let Some(result) = emissions.next().await {
//!     println!("{:?}", result);
//! }
//! ```

use std::convert::Infallible;
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use futures_util::StreamExt;
use larder_core::{
    expiration_from, CacheReadError, ConfigError, Providable, ProviderConfig, ProviderError,
    ProviderRequest, StoreError, Timestamp,
};
use larder_storage::{CacheAdapter, CacheStats, CacheStore, CollectionWriteReport};
use tokio::runtime::Handle;
use tracing::Instrument;
use uuid::Uuid;

use crate::assembler::{CollectionAssembler, CollectionCache, CollectionPlan};
use crate::behavior::{Behaviors, ItemSource, ProviderBehavior};
use crate::decoder::Decoder;
use crate::notify::{Inline, NotificationContext};
use crate::policy::{RetrievalPlan, RetrievalPolicy};
use crate::stream::{released, Emitter, Retrieval, RetrievalHandle, RetrievalStream};
use crate::transport::Transport;

/// Result of one single-item emission.
pub type ItemResult<T> = Result<T, ProviderError>;

/// Result of one collection emission.
pub type CollectionResult<T> = Result<Vec<T>, ProviderError<T>>;

/// Cold single-item retrieval.
pub type ItemRetrieval<T> = Retrieval<T, ProviderError>;

/// Cold collection retrieval.
pub type CollectionRetrieval<T> = Retrieval<Vec<T>, ProviderError<T>>;

// ============================================================================
// OPTIONS
// ============================================================================

/// Per-call retrieval options.
pub struct RetrieveOptions<R> {
    /// Serve an expired record before refreshing. `None` uses the configured
    /// default.
    pub allow_stale: Option<bool>,
    /// Remote retries for single-item retrievals. `None` uses the configured
    /// default. Ignored by collection retrievals.
    pub retry_count: Option<u32>,
    /// Behaviors applied after the orchestrator's own.
    pub request_behaviors: Vec<Arc<dyn ProviderBehavior<R>>>,
    /// Where emissions are delivered.
    pub notify_on: Arc<dyn NotificationContext>,
}

impl<R> RetrieveOptions<R> {
    pub fn new() -> Self {
        Self {
            allow_stale: None,
            retry_count: None,
            request_behaviors: Vec::new(),
            notify_on: Arc::new(Inline),
        }
    }

    pub fn allow_stale(mut self, allow: bool) -> Self {
        self.allow_stale = Some(allow);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retry_count = Some(retries);
        self
    }

    pub fn with_behavior(mut self, behavior: Arc<dyn ProviderBehavior<R>>) -> Self {
        self.request_behaviors.push(behavior);
        self
    }

    pub fn notify_on(mut self, context: Arc<dyn NotificationContext>) -> Self {
        self.notify_on = context;
        self
    }
}

impl<R> Default for RetrieveOptions<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for RetrieveOptions<R> {
    fn clone(&self) -> Self {
        Self {
            allow_stale: self.allow_stale,
            retry_count: self.retry_count,
            request_behaviors: self.request_behaviors.clone(),
            notify_on: Arc::clone(&self.notify_on),
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`RetrievalOrchestrator`].
pub struct OrchestratorBuilder<X: Transport> {
    store: Arc<dyn CacheStore>,
    transport: X,
    config: ProviderConfig,
    behaviors: Vec<Arc<dyn ProviderBehavior<X::Request>>>,
    worker: Option<Handle>,
}

impl<X: Transport> OrchestratorBuilder<X> {
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a provider-level behavior; these run before request behaviors.
    pub fn behavior(mut self, behavior: Arc<dyn ProviderBehavior<X::Request>>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Runtime on which retrievals execute. Defaults to the current one.
    pub fn worker(mut self, handle: Handle) -> Self {
        self.worker = Some(handle);
        self
    }

    pub fn build(self) -> Result<RetrievalOrchestrator<X>, ConfigError> {
        self.config.validate()?;
        let worker = match self.worker {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ConfigError::MissingRuntime)?,
        };

        let lifetime = Arc::new(());
        let inner = Arc::new(Inner {
            adapter: CacheAdapter::new(self.store),
            transport: self.transport,
            config: self.config,
            behaviors: self.behaviors,
            worker,
            in_flight: DashMap::new(),
            lifetime: Arc::downgrade(&lifetime),
        });

        Ok(RetrievalOrchestrator { inner, lifetime })
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

struct Inner<X: Transport> {
    adapter: CacheAdapter,
    transport: X,
    config: ProviderConfig,
    behaviors: Vec<Arc<dyn ProviderBehavior<X::Request>>>,
    worker: Handle,
    in_flight: DashMap<Uuid, RetrievalHandle>,
    lifetime: Weak<()>,
}

/// Cache-then-remote retrieval engine.
///
/// Dropping the orchestrator fails every undelivered emission of its
/// pending retrievals with `NoLiveOrchestrator`.
pub struct RetrievalOrchestrator<X: Transport> {
    inner: Arc<Inner<X>>,
    lifetime: Arc<()>,
}

impl<X: Transport> RetrievalOrchestrator<X> {
    pub fn builder(store: Arc<dyn CacheStore>, transport: X) -> OrchestratorBuilder<X> {
        OrchestratorBuilder {
            store,
            transport,
            config: ProviderConfig::default(),
            behaviors: Vec::new(),
            worker: None,
        }
    }

    /// Create an orchestrator on the current runtime.
    pub fn new(
        store: Arc<dyn CacheStore>,
        transport: X,
        config: ProviderConfig,
    ) -> Result<Self, ConfigError> {
        Self::builder(store, transport).config(config).build()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    /// Counters of the underlying cache adapter.
    pub fn stats(&self) -> CacheStats {
        self.inner.adapter.stats()
    }

    /// Number of retrievals currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Cancel every running retrieval (best-effort).
    pub fn cancel_all(&self) {
        for entry in self.inner.in_flight.iter() {
            entry.value().cancel();
        }
    }

    /// Remove a cached record.
    pub async fn invalidate(&self, key: &str) -> Result<(), StoreError> {
        self.inner.adapter.remove(key).await
    }

    /// Write an item to cache with the configured TTL.
    pub async fn store_item<T: Providable>(&self, key: &str, item: &T) -> Result<(), StoreError> {
        let expiration = expiration_from(Utc::now(), self.inner.config.item_ttl);
        self.inner.adapter.write_item(key, item, expiration).await
    }

    /// Write a collection to cache with the configured TTL.
    pub async fn store_collection<T: Providable>(
        &self,
        key: &str,
        items: &[T],
    ) -> CollectionWriteReport {
        let expiration = expiration_from(Utc::now(), self.inner.config.item_ttl);
        self.inner.adapter.write_collection(key, items, expiration).await
    }

    // ------------------------------------------------------------------------
    // Stream forms
    // ------------------------------------------------------------------------

    /// Describe a single-item retrieval. Nothing runs until the returned
    /// retrieval is streamed.
    pub fn retrieve_item<T, D>(
        &self,
        request: X::Request,
        decoder: D,
        options: RetrieveOptions<X::Request>,
    ) -> ItemRetrieval<T>
    where
        T: Providable,
        D: Decoder,
    {
        let owner = Arc::downgrade(&self.inner);
        let request = Arc::new(request);
        let decoder = Arc::new(decoder);

        Retrieval::new(move || {
            let Some(inner) = owner.upgrade() else {
                return released();
            };
            let (emitter, stream) =
                Emitter::channel(Arc::clone(&options.notify_on), inner.lifetime.clone());
            if !emitter.owner_alive() {
                return released();
            }

            let run = Run::new(&inner, &request, &options, emitter.handle().clone());
            let allow_stale = options
                .allow_stale
                .unwrap_or(inner.config.allow_stale_default);
            let retries = inner.retry_count(options.retry_count);
            let span = tracing::debug_span!(
                "retrieval",
                id = %run.handle.id(),
                kind = "item",
                key = ?request.persistence_key(),
            );

            let decoder = Arc::clone(&decoder);
            inner.worker.spawn(
                async move {
                    run.item::<T, D>(&*decoder, allow_stale, retries, emitter)
                        .await;
                }
                .instrument(span),
            );
            stream
        })
    }

    /// Describe a collection retrieval. Nothing runs until the returned
    /// retrieval is streamed.
    pub fn retrieve_collection<T, D>(
        &self,
        request: X::Request,
        decoder: D,
        options: RetrieveOptions<X::Request>,
    ) -> CollectionRetrieval<T>
    where
        T: Providable,
        D: Decoder,
    {
        let owner = Arc::downgrade(&self.inner);
        let request = Arc::new(request);
        let decoder = Arc::new(decoder);

        Retrieval::new(move || {
            let Some(inner) = owner.upgrade() else {
                return released();
            };
            let (emitter, stream) =
                Emitter::channel(Arc::clone(&options.notify_on), inner.lifetime.clone());
            if !emitter.owner_alive() {
                return released();
            }

            let run = Run::new(&inner, &request, &options, emitter.handle().clone());
            let allow_stale = options
                .allow_stale
                .unwrap_or(inner.config.allow_stale_default);
            let span = tracing::debug_span!(
                "retrieval",
                id = %run.handle.id(),
                kind = "collection",
                key = ?request.persistence_key(),
            );

            let decoder = Arc::clone(&decoder);
            inner.worker.spawn(
                async move {
                    run.collection::<T, D>(&*decoder, allow_stale, emitter)
                        .await;
                }
                .instrument(span),
            );
            stream
        })
    }

    // ------------------------------------------------------------------------
    // Callback forms
    // ------------------------------------------------------------------------

    /// Run a single-item retrieval and hand every emission to `callback` on
    /// the options' notification context.
    pub fn provide_item<T, D, F>(
        &self,
        request: X::Request,
        decoder: D,
        options: RetrieveOptions<X::Request>,
        callback: F,
    ) -> RetrievalHandle
    where
        T: Providable,
        D: Decoder,
        F: Fn(ItemResult<T>) + Send + Sync + 'static,
    {
        let notify = Arc::clone(&options.notify_on);
        let stream = self
            .retrieve_item::<T, D>(request, decoder, options.notify_on(Arc::new(Inline)))
            .stream();
        self.forward(stream, notify, callback)
    }

    /// Run a collection retrieval and hand every emission to `callback` on
    /// the options' notification context.
    pub fn provide_collection<T, D, F>(
        &self,
        request: X::Request,
        decoder: D,
        options: RetrieveOptions<X::Request>,
        callback: F,
    ) -> RetrievalHandle
    where
        T: Providable,
        D: Decoder,
        F: Fn(CollectionResult<T>) + Send + Sync + 'static,
    {
        let notify = Arc::clone(&options.notify_on);
        let stream = self
            .retrieve_collection::<T, D>(request, decoder, options.notify_on(Arc::new(Inline)))
            .stream();
        self.forward(stream, notify, callback)
    }

    fn forward<V, E, F>(
        &self,
        mut stream: RetrievalStream<V, E>,
        notify: Arc<dyn NotificationContext>,
        callback: F,
    ) -> RetrievalHandle
    where
        V: Send + 'static,
        E: Send + 'static,
        F: Fn(Result<V, E>) + Send + Sync + 'static,
    {
        let handle = stream.handle();
        let callback = Arc::new(callback);
        self.inner.worker.spawn(async move {
            while let Some(emission) = stream.next().await {
                let callback = Arc::clone(&callback);
                notify.deliver(Box::new(move || callback(emission)));
            }
        });
        handle
    }
}

impl<X: Transport> Drop for RetrievalOrchestrator<X> {
    fn drop(&mut self) {
        let pending = self.inner.in_flight.len();
        if pending > 0 {
            tracing::debug!(pending, "Orchestrator released with retrievals in flight");
        }
    }
}

impl<X: Transport> std::fmt::Debug for RetrievalOrchestrator<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalOrchestrator")
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

impl<X: Transport> Inner<X> {
    fn retry_count(&self, requested: Option<u32>) -> u32 {
        let retries = requested.unwrap_or(self.config.default_retry_count);
        if let Err(e) = self.config.check_retry_count(retries) {
            tracing::warn!(error = %e, "Clamping retry count");
            return self.config.max_retry_count;
        }
        retries
    }

    fn expiration(&self, request: &X::Request, now: Timestamp) -> Option<Timestamp> {
        expiration_from(now, request.cache_ttl().or(self.config.item_ttl))
    }
}

// ============================================================================
// RUN
// ============================================================================

/// Removes a run from the in-flight table when it ends.
struct InFlightGuard<X: Transport> {
    inner: Arc<Inner<X>>,
    id: Uuid,
}

impl<X: Transport> Drop for InFlightGuard<X> {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.id);
    }
}

/// State of one retrieval run on the worker.
struct Run<X: Transport> {
    inner: Arc<Inner<X>>,
    request: Arc<X::Request>,
    behaviors: Behaviors<X::Request>,
    handle: RetrievalHandle,
    _guard: InFlightGuard<X>,
}

impl<X: Transport> Run<X> {
    fn new(
        inner: &Arc<Inner<X>>,
        request: &Arc<X::Request>,
        options: &RetrieveOptions<X::Request>,
        handle: RetrievalHandle,
    ) -> Self {
        inner.in_flight.insert(handle.id(), handle.clone());
        Self {
            inner: Arc::clone(inner),
            request: Arc::clone(request),
            behaviors: Behaviors::chain(&inner.behaviors, &options.request_behaviors),
            _guard: InFlightGuard {
                inner: Arc::clone(inner),
                id: handle.id(),
            },
            handle,
        }
    }

    /// Key to read from, if the cache may be consulted at all.
    fn read_key(&self) -> Option<&str> {
        if self.request.ignores_cached_content() {
            return None;
        }
        self.request.persistence_key()
    }

    fn emit<V, I>(&self, emitter: &mut Emitter<V, I>, value: V, source: ItemSource)
    where
        V: Send + 'static,
        I: Send + 'static,
    {
        emitter.success(value, |value| {
            self.behaviors.did_provide(value, source, &self.request)
        });
    }

    /// Stop early if the owner is gone or the caller cancelled.
    fn should_stop<V, I>(&self, emitter: &mut Emitter<V, I>) -> bool
    where
        V: Send + 'static,
        I: Send + 'static,
    {
        if emitter.is_closed() {
            tracing::debug!("Retrieval cancelled");
            return true;
        }
        if !emitter.owner_alive() {
            emitter.failure(ProviderError::NoLiveOrchestrator);
            return true;
        }
        false
    }

    async fn item<T: Providable, D: Decoder>(
        self,
        decoder: &D,
        allow_stale: bool,
        retries: u32,
        mut emitter: Emitter<T, Infallible>,
    ) {
        self.behaviors.will_provide(&self.request);
        if self.should_stop(&mut emitter) {
            return;
        }

        let cached = match self.read_key() {
            Some(key) => match self.inner.adapter.read_item::<T>(key).await {
                Ok(record) => Some(record),
                Err(CacheReadError::NotFound { .. }) => None,
                Err(e @ CacheReadError::Corrupt { .. }) => {
                    tracing::warn!(error = %e, "Ignoring corrupt cache record");
                    None
                }
                Err(e) => {
                    emitter.failure(ProviderError::Persistence(e));
                    return;
                }
            },
            None => None,
        };

        match RetrievalPolicy::plan(cached, allow_stale, Utc::now()) {
            RetrievalPlan::CacheOnly(item) => {
                tracing::debug!("Cache hit");
                self.emit(&mut emitter, item, ItemSource::Cache);
                return;
            }
            RetrievalPlan::StaleThenRemote(item) => {
                tracing::debug!("Serving stale record before refresh");
                self.emit(&mut emitter, item, ItemSource::StaleCache);
            }
            RetrievalPlan::RemoteOnly => tracing::debug!("Cache miss"),
        }

        if self.should_stop(&mut emitter) {
            return;
        }
        match self.remote_item::<T, D>(decoder, retries).await {
            Ok(item) => self.emit(&mut emitter, item, ItemSource::Remote),
            Err(e) => emitter.failure(e),
        }
    }

    async fn collection<T: Providable, D: Decoder>(
        self,
        decoder: &D,
        allow_stale: bool,
        mut emitter: Emitter<Vec<T>, T>,
    ) {
        self.behaviors.will_provide(&self.request);
        if self.should_stop(&mut emitter) {
            return;
        }

        let cached = match self.read_key() {
            Some(key) => CollectionAssembler::assemble::<T>(&self.inner.adapter, key).await,
            None => CollectionCache::Absent,
        };

        let salvage = match cached.plan(allow_stale, Utc::now()) {
            CollectionPlan::CacheOnly(items) => {
                tracing::debug!(count = items.len(), "Collection cache hit");
                self.emit(&mut emitter, items, ItemSource::Cache);
                return;
            }
            CollectionPlan::StaleThenRemote(items) => {
                tracing::debug!(count = items.len(), "Serving stale collection before refresh");
                self.emit(&mut emitter, items, ItemSource::StaleCache);
                None
            }
            CollectionPlan::RemoteOnly { salvage } => salvage,
        };

        if self.should_stop(&mut emitter) {
            return;
        }
        match self.remote_collection::<T, D>(decoder).await {
            Ok(items) => self.emit(&mut emitter, items, ItemSource::Remote),
            Err(e) => {
                let err = match salvage {
                    Some(salvage) => salvage.fold(e, allow_stale),
                    None => e.widen(),
                };
                emitter.failure(err);
            }
        }
    }

    /// Remote leg with immediate retries; each attempt repeats transport,
    /// decode and write-back.
    async fn remote_item<T: Providable, D: Decoder>(
        &self,
        decoder: &D,
        retries: u32,
    ) -> Result<T, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.remote_item_once::<T, D>(decoder).await {
                Ok(item) => return Ok(item),
                Err(e) if attempt < retries && !self.handle.is_cancelled() => {
                    attempt += 1;
                    tracing::debug!(attempt, retries, error = %e, "Remote leg failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn remote_item_once<T: Providable, D: Decoder>(
        &self,
        decoder: &D,
    ) -> Result<T, ProviderError> {
        let payload = self.fetch().await?;
        let item: T = decoder.decode(&payload)?;

        if let Some(key) = self.request.persistence_key() {
            let expiration = self.inner.expiration(&self.request, Utc::now());
            if let Err(e) = self.inner.adapter.write_item(key, &item, expiration).await {
                tracing::warn!(key, error = %e, "Cache write-back failed");
            }
        }
        Ok(item)
    }

    async fn remote_collection<T: Providable, D: Decoder>(
        &self,
        decoder: &D,
    ) -> Result<Vec<T>, ProviderError> {
        let payload = self.fetch().await?;
        let items: Vec<T> = decoder.decode(&payload)?;

        if let Some(key) = self.request.persistence_key() {
            let expiration = self.inner.expiration(&self.request, Utc::now());
            let report = self
                .inner
                .adapter
                .write_collection(key, &items, expiration)
                .await;
            if !report.is_clean() {
                tracing::warn!(
                    key,
                    member_failures = report.member_failures.len(),
                    index_failed = report.index_failure.is_some(),
                    "Collection write-back incomplete"
                );
            }
        }
        Ok(items)
    }

    async fn fetch(&self) -> Result<Vec<u8>, ProviderError> {
        let response = self.inner.transport.send(&self.request).await?;
        Ok(response.into_payload()?)
    }
}

//! Interceptors invoked around each retrieval.
//!
//! Behaviors observe; they cannot change what a retrieval emits.

use std::any::Any;
use std::sync::Arc;

/// Where an emitted value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemSource {
    /// Fresh cached record.
    Cache,
    /// Expired cached record served ahead of a refresh.
    StaleCache,
    /// Remote fetch.
    Remote,
}

/// Hook pair invoked around a retrieval.
///
/// `will_provide` runs once per retrieval before any cache or remote I/O.
/// `did_provide` runs once per successful emission, so twice for a
/// stale-then-remote retrieval; it never runs for failures. `item` is the
/// emitted value (`T` for items, `Vec<T>` for collections).
pub trait ProviderBehavior<R>: Send + Sync {
    fn will_provide(&self, _request: &R) {}

    fn did_provide(&self, _item: &dyn Any, _source: ItemSource, _request: &R) {}
}

/// Ordered list of behaviors applied as one.
pub struct Behaviors<R> {
    list: Vec<Arc<dyn ProviderBehavior<R>>>,
}

impl<R> Behaviors<R> {
    /// Provider-level behaviors run before request-level ones.
    pub fn chain(
        provider: &[Arc<dyn ProviderBehavior<R>>],
        request: &[Arc<dyn ProviderBehavior<R>>],
    ) -> Self {
        Self {
            list: provider.iter().chain(request.iter()).cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn will_provide(&self, request: &R) {
        for behavior in &self.list {
            behavior.will_provide(request);
        }
    }

    pub fn did_provide(&self, item: &dyn Any, source: ItemSource, request: &R) {
        tracing::trace!(count = self.list.len(), ?source, "Dispatching did_provide");
        for behavior in &self.list {
            behavior.did_provide(item, source, request);
        }
    }
}

impl<R> Clone for Behaviors<R> {
    fn clone(&self) -> Self {
        Self {
            list: self.list.clone(),
        }
    }
}

/// Behavior that logs every retrieval through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBehavior;

impl<R: larder_core::ProviderRequest> ProviderBehavior<R> for TracingBehavior {
    fn will_provide(&self, request: &R) {
        tracing::debug!(key = ?request.persistence_key(), "Providing");
    }

    fn did_provide(&self, _item: &dyn Any, source: ItemSource, request: &R) {
        tracing::debug!(key = ?request.persistence_key(), ?source, "Provided");
    }
}

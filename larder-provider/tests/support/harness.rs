//! Shared setup for orchestrator integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use futures_util::StreamExt;
use larder_provider::{
    CacheStore, CollectionResult, ItemResult, JsonDecoder, Providable, ProviderConfig,
    RemoteRequest, RetrievalOrchestrator, RetrieveOptions,
};
use larder_test_utils::{fixtures::test_config, init_test_tracing, MockTransport};

pub type Orchestrator = RetrievalOrchestrator<MockTransport>;

/// Orchestrator on the current test runtime with the default test config.
pub fn orchestrator(store: Arc<dyn CacheStore>, mock: &MockTransport) -> Orchestrator {
    orchestrator_with(store, mock, test_config())
}

pub fn orchestrator_with(
    store: Arc<dyn CacheStore>,
    mock: &MockTransport,
    config: ProviderConfig,
) -> Orchestrator {
    init_test_tracing();
    RetrievalOrchestrator::new(store, mock.clone(), config).expect("orchestrator should build")
}

/// Run a single-item retrieval to completion.
pub async fn fetch_item<T: Providable>(
    orchestrator: &Orchestrator,
    request: RemoteRequest,
    options: RetrieveOptions<RemoteRequest>,
) -> Vec<ItemResult<T>> {
    orchestrator
        .retrieve_item::<T, _>(request, JsonDecoder::new(), options)
        .stream()
        .collect()
        .await
}

/// Run a collection retrieval to completion.
pub async fn fetch_collection<T: Providable>(
    orchestrator: &Orchestrator,
    request: RemoteRequest,
    options: RetrieveOptions<RemoteRequest>,
) -> Vec<CollectionResult<T>> {
    orchestrator
        .retrieve_collection::<T, _>(request, JsonDecoder::new(), options)
        .stream()
        .collect()
        .await
}

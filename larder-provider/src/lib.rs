//! Larder Provider - Retrieval Orchestration
//!
//! Cache-then-remote retrieval for single items and collections:
//! - [`RetrievalPolicy`] routes a request by cache freshness
//! - [`CollectionAssembler`] rebuilds collections from their cached index
//! - [`RetrievalOrchestrator`] runs the cache leg, the remote leg and
//!   write-back, emitting results through a [`RetrievalStream`] or a
//!   callback on a chosen [`NotificationContext`]

pub mod assembler;
pub mod behavior;
pub mod decoder;
pub mod notify;
pub mod orchestrator;
pub mod policy;
pub mod stream;
pub mod transport;

pub use assembler::{CollectionAssembler, CollectionCache, CollectionPlan, Salvage};
pub use behavior::{Behaviors, ItemSource, ProviderBehavior, TracingBehavior};
pub use decoder::{Decoder, JsonDecoder};
pub use notify::{Delivery, Inline, NotificationContext, SerialContext};
pub use orchestrator::{
    CollectionResult, CollectionRetrieval, ItemResult, ItemRetrieval, OrchestratorBuilder,
    RetrievalOrchestrator, RetrieveOptions,
};
pub use policy::{CacheState, RetrievalDecision, RetrievalPlan, RetrievalPolicy};
pub use stream::{Retrieval, RetrievalHandle, RetrievalStream};
pub use transport::{Response, Transport};

// Re-export the data model so callers need one import path.
pub use larder_core::{
    CacheRecord, ConfigError, HttpMethod, PartialFailure, Providable, ProviderConfig,
    ProviderError, ProviderRequest, RemoteRequest,
};
pub use larder_storage::{CacheAdapter, CacheStats, CacheStore, InMemoryCacheStore};

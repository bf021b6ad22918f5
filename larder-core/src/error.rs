//! Error types for larder operations

use std::convert::Infallible;
use thiserror::Error;

use crate::PartialFailure;

/// Errors reported by a cache store implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Cache store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache store I/O failed for key {key}: {reason}")]
    Io { key: String, reason: String },

    #[error("Failed to encode record for key {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Cache store lock poisoned")]
    LockPoisoned,
}

/// Failure to read a single record out of the cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheReadError {
    #[error("Cache record not found: {key}")]
    NotFound { key: String },

    #[error("Cache store error for {key}: {reason}")]
    Store { key: String, reason: String },

    #[error("Corrupt cache record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl CacheReadError {
    /// The key this failure refers to.
    pub fn key(&self) -> &str {
        match self {
            Self::NotFound { key } | Self::Store { key, .. } | Self::Corrupt { key, .. } => key,
        }
    }

    /// Returns true if the record was simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Build a read error from a store-level failure.
    pub fn from_store(key: impl Into<String>, err: &StoreError) -> Self {
        Self::Store {
            key: key.into(),
            reason: err.to_string(),
        }
    }
}

/// Remote transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request failed: {reason}")]
    Request { reason: String },

    #[error("Remote responded with status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Remote returned no payload")]
    EmptyPayload,
}

/// Payload did not match the expected shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Decoding failed: {reason}")]
pub struct DecodeError {
    pub reason: String,
}

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("No tokio runtime available for retrieval workers")]
    MissingRuntime,
}

/// Closed set of retrieval failures.
///
/// The type parameter is the element type carried by
/// [`ProviderError::PartialRetrieval`]. Single-item retrievals leave it at
/// the default `Infallible`, so they can never carry salvaged items.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError<T = Infallible> {
    #[error("Network error: {0}")]
    Network(TransportError),

    #[error("Persistence error: {0}")]
    Persistence(CacheReadError),

    #[error("Decoding error: {0}")]
    Decoding(DecodeError),

    #[error(
        "Partial retrieval: {} items recovered from cache, {} failed; remote refresh failed: {underlying}",
        .retrieved_items.len(),
        .failures.len()
    )]
    PartialRetrieval {
        retrieved_items: Vec<T>,
        failures: Vec<PartialFailure>,
        underlying: Box<ProviderError>,
    },

    #[error("Orchestrator was released before the retrieval completed")]
    NoLiveOrchestrator,
}

impl ProviderError {
    /// Lift an item-free error into an error type that may carry items.
    pub fn widen<U>(self) -> ProviderError<U> {
        match self {
            Self::Network(e) => ProviderError::Network(e),
            Self::Persistence(e) => ProviderError::Persistence(e),
            Self::Decoding(e) => ProviderError::Decoding(e),
            Self::PartialRetrieval {
                retrieved_items,
                failures,
                underlying,
            } => ProviderError::PartialRetrieval {
                retrieved_items: retrieved_items.into_iter().map(|never| match never {}).collect(),
                failures,
                underlying,
            },
            Self::NoLiveOrchestrator => ProviderError::NoLiveOrchestrator,
        }
    }
}

impl<T> ProviderError<T> {
    /// Returns true for the partial-retrieval variant.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialRetrieval { .. })
    }
}

impl<T> From<TransportError> for ProviderError<T> {
    fn from(e: TransportError) -> Self {
        Self::Network(e)
    }
}

impl<T> From<DecodeError> for ProviderError<T> {
    fn from(e: DecodeError) -> Self {
        Self::Decoding(e)
    }
}

impl<T> From<CacheReadError> for ProviderError<T> {
    fn from(e: CacheReadError) -> Self {
        Self::Persistence(e)
    }
}

// =============================================================================
// TESTS
// =============================================================================

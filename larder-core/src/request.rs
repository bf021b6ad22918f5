//! Request contract and cacheable item marker.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// Describes a resource to retrieve.
///
/// Everything beyond the persistence key and the cache-bypass flag is opaque
/// to retrieval and only interpreted by the transport.
pub trait ProviderRequest: Send + Sync + 'static {
    /// Cache key for this request. `None` keeps the cache out of the call
    /// entirely: nothing is read and nothing is written back.
    fn persistence_key(&self) -> Option<&str>;

    /// Skip the cache read and always go remote. Write-back still happens
    /// when a persistence key is present.
    fn ignores_cached_content(&self) -> bool {
        false
    }

    /// Per-request override of the configured item TTL.
    fn cache_ttl(&self) -> Option<Duration> {
        None
    }
}

/// Marker trait for values that can be cached and provided.
///
/// `identifier()` addresses the member record when the value is cached as
/// part of a collection, so it must be stable and unique within a collection.
pub trait Providable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn identifier(&self) -> String;
}

/// HTTP verbs understood by the stock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Mutating verbs never serve cached content.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Get | Self::Head)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Stock HTTP-shaped request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub persistence_key: Option<String>,
    pub cache_ttl: Option<Duration>,
}

impl RemoteRequest {
    /// Create a request with no query, headers, body or cache key.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            persistence_key: None,
            cache_ttl: None,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// Cache results under the given key.
    pub fn with_persistence_key(mut self, key: impl Into<String>) -> Self {
        self.persistence_key = Some(key.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Override the configured TTL for records written by this request.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

impl ProviderRequest for RemoteRequest {
    fn persistence_key(&self) -> Option<&str> {
        self.persistence_key.as_deref()
    }

    fn ignores_cached_content(&self) -> bool {
        self.method.is_mutating()
    }

    fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }
}

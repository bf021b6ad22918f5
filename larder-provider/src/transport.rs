//! Remote transport boundary.

use async_trait::async_trait;
use larder_core::{ProviderRequest, TransportError};

/// Raw response from the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub data: Option<Vec<u8>>,
}

impl Response {
    /// A `200` response carrying `data`.
    pub fn ok(data: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            data: Some(data.into()),
        }
    }

    /// A response with no payload.
    pub fn empty(status: u16) -> Self {
        Self { status, data: None }
    }

    /// The payload, or `TransportError::EmptyPayload`.
    pub fn into_payload(self) -> Result<Vec<u8>, TransportError> {
        self.data.ok_or(TransportError::EmptyPayload)
    }
}

/// Performs a described request against the remote.
///
/// Implementations are shared across concurrent retrievals and must be
/// thread-safe; timeouts and backoff are the transport's own business.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Request: ProviderRequest;

    async fn send(&self, request: &Self::Request) -> Result<Response, TransportError>;
}

//! Payload decoding boundary.

use larder_core::DecodeError;
use serde::de::DeserializeOwned;

/// Turns raw payload bytes into typed values.
///
/// Must handle both a single `T` and `Vec<T>`.
pub trait Decoder: Send + Sync + 'static {
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, DecodeError>;
}

/// JSON decoder, optionally unwrapping an envelope first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonDecoder {
    pointer: Option<String>,
}

impl JsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the value at a JSON pointer (e.g. `/data/items`) instead of
    /// the document root.
    pub fn at_pointer(pointer: impl Into<String>) -> Self {
        Self {
            pointer: Some(pointer.into()),
        }
    }
}

impl Decoder for JsonDecoder {
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, DecodeError> {
        let Some(pointer) = &self.pointer else {
            return Ok(serde_json::from_slice(data)?);
        };

        let mut document: serde_json::Value = serde_json::from_slice(data)?;
        let value = document
            .pointer_mut(pointer)
            .map(serde_json::Value::take)
            .ok_or_else(|| DecodeError::new(format!("no value at {}", pointer)))?;
        Ok(serde_json::from_value(value)?)
    }
}

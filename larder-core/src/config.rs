//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Retrieval configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Expiration applied to every write-back. `None` writes records that
    /// never go stale.
    pub item_ttl: Option<Duration>,
    /// Remote retries for single-item retrievals when the caller sets none.
    pub default_retry_count: u32,
    /// Upper bound accepted for any retry count.
    pub max_retry_count: u32,
    /// Default for `allow_stale` in retrieval options.
    pub allow_stale_default: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            item_ttl: Some(Duration::from_secs(3600)), // 1 hour
            default_retry_count: 0,
            max_retry_count: 10,
            allow_stale_default: false,
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `LARDER_ITEM_TTL_SECS`: TTL for written records, `0` disables expiry (default: 3600)
    /// - `LARDER_RETRY_COUNT`: Default single-item retry count (default: 0)
    /// - `LARDER_MAX_RETRY_COUNT`: Retry ceiling (default: 10)
    /// - `LARDER_ALLOW_STALE`: Serve stale records before refreshing (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            item_ttl: match std::env::var("LARDER_ITEM_TTL_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.item_ttl,
            },
            default_retry_count: std::env::var("LARDER_RETRY_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_retry_count),
            max_retry_count: std::env::var("LARDER_MAX_RETRY_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retry_count),
            allow_stale_default: std::env::var("LARDER_ALLOW_STALE")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.allow_stale_default),
        }
    }

    pub fn with_item_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.item_ttl = ttl;
        self
    }

    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.default_retry_count = retries;
        self
    }

    pub fn with_max_retry_count(mut self, max: u32) -> Self {
        self.max_retry_count = max;
        self
    }

    pub fn with_allow_stale(mut self, allow: bool) -> Self {
        self.allow_stale_default = allow;
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - item_ttl, when set, is non-zero
    /// - default_retry_count <= max_retry_count
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ttl) = self.item_ttl {
            if ttl.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "item_ttl".to_string(),
                    value: format!("{:?}", ttl),
                    reason: "item_ttl must be positive, use None to disable expiry".to_string(),
                });
            }
        }

        self.check_retry_count(self.default_retry_count)
    }

    /// Reject retry counts above the configured ceiling.
    pub fn check_retry_count(&self, retries: u32) -> Result<(), ConfigError> {
        if retries > self.max_retry_count {
            return Err(ConfigError::InvalidValue {
                field: "retry_count".to_string(),
                value: retries.to_string(),
                reason: format!("retry_count must not exceed {}", self.max_retry_count),
            });
        }
        Ok(())
    }
}

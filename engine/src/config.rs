//! Engine configuration.
//!
//! Loads settings from environment variables with sensible defaults.

use crate::types::Money;
use std::path::PathBuf;
use std::time::Duration;
use wishlist_runtime::{RetryPolicy, StoreConfig};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Smallest accepted contribution
    pub min_contribution: Money,
    /// Retries of the initial list load before the view errors out
    pub load_max_retries: usize,
    /// Delay before the first load retry
    pub load_retry_delay: Duration,
    /// How long a session waits for the result of one operation
    pub request_timeout: Duration,
    /// Store action broadcast buffer
    pub broadcast_capacity: usize,
    /// File backing the guest journal in the demo binary; a scratch file
    /// removed on exit when unset
    pub guest_store_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_contribution: Money::from_units(100),
            load_max_retries: 2,
            load_retry_delay: Duration::from_millis(200),
            request_timeout: Duration::from_secs(10),
            broadcast_capacity: 64,
            guest_store_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`
    ///
    /// Unset or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            min_contribution: lookup("WISHLIST_MIN_CONTRIBUTION")
                .and_then(|v| Money::parse(&v).ok())
                .unwrap_or(defaults.min_contribution),
            load_max_retries: lookup("WISHLIST_LOAD_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.load_max_retries),
            load_retry_delay: lookup("WISHLIST_LOAD_RETRY_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .map_or(defaults.load_retry_delay, Duration::from_millis),
            request_timeout: lookup("WISHLIST_REQUEST_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map_or(defaults.request_timeout, Duration::from_millis),
            broadcast_capacity: lookup("WISHLIST_BROADCAST_CAPACITY")
                .and_then(|v| v.parse().ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.broadcast_capacity),
            guest_store_path: lookup("WISHLIST_GUEST_STORE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or(defaults.guest_store_path),
        }
    }

    /// Set the minimum contribution
    #[must_use]
    pub const fn with_min_contribution(mut self, minimum: Money) -> Self {
        self.min_contribution = minimum;
        self
    }

    /// Set load retries and the first retry delay
    #[must_use]
    pub const fn with_load_retries(mut self, retries: usize, delay: Duration) -> Self {
        self.load_max_retries = retries;
        self.load_retry_delay = delay;
        self
    }

    /// Set the per-operation timeout
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Retry policy for the initial load
    #[must_use]
    pub fn load_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.load_max_retries)
            .initial_delay(self.load_retry_delay)
            .build()
    }

    /// Store settings for one list view
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default().with_broadcast_capacity(self.broadcast_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_without_variables() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.min_contribution, Money::from_minor(10_000));
        assert_eq!(config.guest_store_path, None);
    }

    #[test]
    fn variables_override_defaults() {
        let vars: HashMap<&str, &str> = [
            ("WISHLIST_MIN_CONTRIBUTION", "50,5"),
            ("WISHLIST_LOAD_MAX_RETRIES", "5"),
            ("WISHLIST_LOAD_RETRY_DELAY_MS", "10"),
            ("WISHLIST_REQUEST_TIMEOUT_MS", "250"),
            ("WISHLIST_BROADCAST_CAPACITY", "8"),
            ("WISHLIST_GUEST_STORE", "/tmp/guest.json"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.min_contribution, Money::from_minor(5_050));
        assert_eq!(config.load_max_retries, 5);
        assert_eq!(config.load_retry_delay, Duration::from_millis(10));
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.broadcast_capacity, 8);
        assert_eq!(config.guest_store_path, Some(PathBuf::from("/tmp/guest.json")));
        assert_eq!(config.load_retry_policy().max_retries, 5);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = EngineConfig::from_lookup(|key| match key {
            "WISHLIST_MIN_CONTRIBUTION" => Some("lots".into()),
            "WISHLIST_BROADCAST_CAPACITY" => Some("0".into()),
            _ => Some(String::new()),
        });
        assert_eq!(config, EngineConfig::default());
    }
}

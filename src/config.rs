//! Engine configuration.
//!
//! Everything has a default matching production behaviour; callers deserialize
//! overrides from whatever configuration source they use.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default ceiling on subdivisions per simulation.
pub const DEFAULT_MAX_SUBDIVISIONS: usize = 100;

/// Tunables for the selection engine, caches and simulation ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of subdivisions accepted into one simulation
    pub max_subdivisions: usize,
    /// Time-to-live of cached blocked masks, in seconds
    pub blocked_cache_ttl_secs: u64,
    /// Maximum number of cached blocked masks
    pub blocked_cache_capacity: usize,
    /// Time-to-live of cached layer statistics, in seconds
    pub stats_cache_ttl_secs: u64,
    /// Maximum number of cached layer statistics payloads
    pub stats_cache_capacity: usize,
    /// zlib level for persisted bitsets (occupied unions, subdivisions)
    pub compression_level: u32,
    /// zlib level for selection previews returned by validation
    pub preview_compression_level: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_subdivisions: DEFAULT_MAX_SUBDIVISIONS,
            blocked_cache_ttl_secs: 10 * 60,
            blocked_cache_capacity: 128,
            stats_cache_ttl_secs: 30 * 60,
            stats_cache_capacity: 256,
            compression_level: 6,
            preview_compression_level: 9,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_max_subdivisions(mut self, max: usize) -> Self {
        self.max_subdivisions = max;
        self
    }

    #[must_use]
    pub fn with_blocked_cache(mut self, ttl: Duration, capacity: usize) -> Self {
        self.blocked_cache_ttl_secs = ttl.as_secs();
        self.blocked_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_stats_cache(mut self, ttl: Duration, capacity: usize) -> Self {
        self.stats_cache_ttl_secs = ttl.as_secs();
        self.stats_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    #[must_use]
    pub fn blocked_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.blocked_cache_ttl_secs)
    }

    #[must_use]
    pub fn stats_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_cache_ttl_secs)
    }

    /// Capacity clamped to at least one entry.
    #[must_use]
    pub fn blocked_cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.blocked_cache_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Capacity clamped to at least one entry.
    #[must_use]
    pub fn stats_cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.stats_cache_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_subdivisions, 100);
        assert_eq!(config.blocked_cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.stats_cache_ttl(), Duration::from_secs(1800));
        assert_eq!(config.compression_level, 6);
        assert_eq!(config.preview_compression_level, 9);
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_subdivisions": 3, "stats_cache_capacity": 0}"#).unwrap();
        assert_eq!(config.max_subdivisions, 3);
        assert_eq!(config.blocked_cache_capacity, 128);
        assert_eq!(config.stats_cache_capacity().get(), 1);
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_subdivisions(5)
            .with_blocked_cache(Duration::from_secs(1), 2)
            .with_compression_level(1);
        assert_eq!(config.max_subdivisions, 5);
        assert_eq!(config.blocked_cache_ttl_secs, 1);
        assert_eq!(config.blocked_cache_capacity().get(), 2);
        assert_eq!(config.compression_level, 1);
    }
}

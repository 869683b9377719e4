//! Sharding configuration
//!
//! Plain data structs deserialized from JSON (or built in code) and handed to
//! `runtime::Builder`. Validation is deliberately deferred to `build()` so a
//! bad shard count or a connection-list mismatch fails the startup path, not
//! the parse.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::sharding::ShardStrategy;
use crate::{Result, ShardError};

/// Connection configuration for a single shard's data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConnConfig {
    /// Shard name, e.g. "shard_00"
    pub name: String,
    /// Backend-specific connection URL
    pub url: String,
}

/// Metrics enablement: off, everything, or an entity allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsMode {
    Disabled,
    All,
    Entities(HashSet<String>),
}

impl Default for MetricsMode {
    fn default() -> Self {
        MetricsMode::Disabled
    }
}

impl MetricsMode {
    /// Whether metrics should be recorded for the given entity.
    pub fn applies_to(&self, entity: &str) -> bool {
        match self {
            MetricsMode::Disabled => false,
            MetricsMode::All => true,
            MetricsMode::Entities(names) => names.contains(entity),
        }
    }
}

/// Behavioral switches for the transaction layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardingOptions {
    /// Skip opening a transaction for read-only operations entirely.
    /// The session is still opened; begin/commit are elided.
    #[serde(default)]
    pub skip_read_only_transaction: bool,
}

/// Top-level sharding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Declared shard count; must be a power of two and must match `shards.len()`.
    pub shard_count: u32,
    /// Per-shard connection entries, indexed by shard id.
    pub shards: Vec<ShardConnConfig>,
    /// Shard indices blacklisted at startup.
    #[serde(default)]
    pub blacklist: Vec<u32>,
    /// Bucket-derivation strategy.
    #[serde(default)]
    pub strategy: ShardStrategy,
    /// Metrics enablement.
    #[serde(default)]
    pub metrics: MetricsMode,
    /// Transaction-layer options.
    #[serde(default)]
    pub options: ShardingOptions,
}

impl ShardingConfig {
    /// Build a config with generated shard entries, for embedded/test use.
    pub fn for_shards(shard_count: u32) -> Self {
        let shards = (0..shard_count)
            .map(|id| ShardConnConfig {
                name: format!("shard_{:02}", id),
                url: format!("mem://shard_{:02}", id),
            })
            .collect();
        Self {
            shard_count,
            shards,
            blacklist: Vec::new(),
            strategy: ShardStrategy::default(),
            metrics: MetricsMode::default(),
            options: ShardingOptions::default(),
        }
    }

    /// Parse a config from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ShardError::Config(e.to_string()))
    }

    pub fn with_metrics(mut self, metrics: MetricsMode) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_blacklist(mut self, blacklist: Vec<u32>) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn with_strategy(mut self, strategy: ShardStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config() {
        let config = ShardingConfig::for_shards(4);
        assert_eq!(config.shard_count, 4);
        assert_eq!(config.shards.len(), 4);
        assert_eq!(config.shards[2].name, "shard_02");
        assert!(config.blacklist.is_empty());
        assert_eq!(config.metrics, MetricsMode::Disabled);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "shard_count": 2,
            "shards": [
                {"name": "shard_00", "url": "postgres://db0"},
                {"name": "shard_01", "url": "postgres://db1"}
            ],
            "blacklist": [1],
            "strategy": "balanced",
            "metrics": "all",
            "options": {"skip_read_only_transaction": true}
        }"#;
        let config = ShardingConfig::from_json_str(json).unwrap();
        assert_eq!(config.shard_count, 2);
        assert_eq!(config.blacklist, vec![1]);
        assert_eq!(config.metrics, MetricsMode::All);
        assert!(config.options.skip_read_only_transaction);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            ShardingConfig::from_json_str("{not json"),
            Err(ShardError::Config(_))
        ));
    }

    #[test]
    fn test_metrics_mode_allow_list() {
        let mode = MetricsMode::Entities(["orders".to_string()].into_iter().collect());
        assert!(mode.applies_to("orders"));
        assert!(!mode.applies_to("users"));
        assert!(MetricsMode::All.applies_to("anything"));
        assert!(!MetricsMode::Disabled.applies_to("anything"));
    }
}

//! Shard Manager - shard count, bucket masking, and the runtime blacklist
//!
//! The shard count is fixed at construction and must be a power of two so the
//! bucket -> shard hop stays a single mask. The blacklist is the only mutable
//! state: administrative tasks toggle it at runtime while every routing
//! decision and health check reads it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::bucket::{
    BucketExtractor, ConsistentHashBucketExtractor, HashBucketExtractor,
    LegacyModuloBucketExtractor,
};
use crate::config::{ShardConnConfig, ShardingConfig};
use crate::{Result, ShardError};

/// Smallest supported shard count
pub const MIN_SHARDS: u32 = 2;
/// Largest supported shard count
pub const MAX_SHARDS: u32 = 1024;
/// Legacy strategy bounds, tied to the historical 16-bit bucket width
pub const LEGACY_MIN_SHARDS: u32 = 16;
pub const LEGACY_MAX_SHARDS: u32 = 64;

// ============================================================================
// Shard Strategy
// ============================================================================

/// Bucket-derivation policy. All strategies feed the same masking operation;
/// they differ in how a key becomes a bucket and in the shard-count range they
/// accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStrategy {
    /// Uniform ahash buckets
    Balanced,
    /// Virtual-node ring buckets
    ConsistentHash,
    /// Historical modulo buckets; restricts shard count to [16, 64]
    LegacyModulo,
}

impl Default for ShardStrategy {
    fn default() -> Self {
        ShardStrategy::Balanced
    }
}

impl ShardStrategy {
    /// Accepted shard-count range for this strategy.
    pub fn shard_range(&self) -> (u32, u32) {
        match self {
            ShardStrategy::LegacyModulo => (LEGACY_MIN_SHARDS, LEGACY_MAX_SHARDS),
            _ => (MIN_SHARDS, MAX_SHARDS),
        }
    }

    /// Default bucket extractor for this strategy.
    pub fn default_extractor(&self) -> Arc<dyn BucketExtractor<str>> {
        match self {
            ShardStrategy::Balanced => Arc::new(HashBucketExtractor),
            ShardStrategy::ConsistentHash => Arc::new(ConsistentHashBucketExtractor::new()),
            ShardStrategy::LegacyModulo => Arc::new(LegacyModuloBucketExtractor),
        }
    }
}

// ============================================================================
// Shard Manager
// ============================================================================

/// Owns the shard count and the runtime blacklist.
///
/// `shard_for_bucket` is a pure function of the bucket and the (immutable)
/// shard count; blacklisting never changes routing, it only surfaces through
/// health reporting and scatter queries that skip dead shards.
pub struct ShardManager {
    num_shards: u32,
    strategy: ShardStrategy,
    /// Blacklisted shards: shard id -> epoch seconds when blacklisted
    blacklist: RwLock<HashMap<u32, i64>>,
}

impl ShardManager {
    /// Create a manager. Fails unless `num_shards` is a power of two inside
    /// the strategy's accepted range.
    pub fn new(num_shards: u32, strategy: ShardStrategy) -> Result<Self> {
        let (min, max) = strategy.shard_range();
        if num_shards < min || num_shards > max || !num_shards.is_power_of_two() {
            return Err(ShardError::InvalidShardCount {
                count: num_shards,
                min,
                max,
            });
        }
        Ok(Self {
            num_shards,
            strategy,
            blacklist: RwLock::new(HashMap::new()),
        })
    }

    /// Create a manager from the declared count and connection list, failing
    /// on any mismatch. This is the startup path; both errors are fatal.
    pub fn with_shard_configs(
        num_shards: u32,
        configs: &[ShardConnConfig],
        strategy: ShardStrategy,
    ) -> Result<Self> {
        if configs.len() != num_shards as usize {
            return Err(ShardError::ShardConfigMismatch {
                declared: num_shards,
                configured: configs.len(),
            });
        }
        Self::new(num_shards, strategy)
    }

    pub fn from_config(config: &ShardingConfig) -> Result<Self> {
        Self::with_shard_configs(config.shard_count, &config.shards, config.strategy)
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    pub fn strategy(&self) -> ShardStrategy {
        self.strategy
    }

    /// Map a bucket to a shard index: `bucket & (num_shards - 1)`.
    pub fn shard_for_bucket(&self, bucket: u32) -> u32 {
        bucket & (self.num_shards - 1)
    }

    /// Display name for a shard, e.g. "shard_03".
    pub fn shard_name(shard: u32) -> String {
        format!("shard_{:02}", shard)
    }

    // ========================================================================
    // Blacklist
    // ========================================================================

    /// Blacklist a shard. Routing still resolves to it; health reports it
    /// unhealthy and scatter reads skip it.
    pub fn blacklist_shard(&self, shard: u32) -> Result<()> {
        if shard >= self.num_shards {
            return Err(ShardError::UnknownShard(shard));
        }
        let now = chrono::Utc::now().timestamp();
        let mut blacklist = self.blacklist.write();
        if blacklist.insert(shard, now).is_none() {
            log::info!("shard {} blacklisted", Self::shard_name(shard));
        }
        if blacklist.len() as u32 == self.num_shards {
            log::warn!("all {} shards are now blacklisted", self.num_shards);
        }
        Ok(())
    }

    /// Remove a shard from the blacklist.
    pub fn unblacklist_shard(&self, shard: u32) -> Result<()> {
        if shard >= self.num_shards {
            return Err(ShardError::UnknownShard(shard));
        }
        if self.blacklist.write().remove(&shard).is_some() {
            log::info!("shard {} unblacklisted", Self::shard_name(shard));
        }
        Ok(())
    }

    pub fn is_blacklisted(&self, shard: u32) -> bool {
        self.blacklist.read().contains_key(&shard)
    }

    /// Snapshot of blacklisted shard indices.
    pub fn blacklisted_shards(&self) -> BTreeSet<u32> {
        self.blacklist.read().keys().copied().collect()
    }

    /// Epoch seconds a shard was blacklisted, if it is.
    pub fn blacklisted_since(&self, shard: u32) -> Option<i64> {
        self.blacklist.read().get(&shard).copied()
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Per-shard health: healthy = not blacklisted.
    pub fn health_status(&self) -> BTreeMap<u32, bool> {
        let blacklist = self.blacklist.read();
        (0..self.num_shards)
            .map(|shard| (shard, !blacklist.contains_key(&shard)))
            .collect()
    }

    /// Shards currently eligible for scatter reads.
    pub fn live_shards(&self) -> Vec<u32> {
        let blacklist = self.blacklist.read();
        (0..self.num_shards)
            .filter(|shard| !blacklist.contains_key(shard))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_power_of_two() {
        for count in [0, 1, 3, 6, 12, 100] {
            assert!(matches!(
                ShardManager::new(count, ShardStrategy::Balanced),
                Err(ShardError::InvalidShardCount { .. })
            ));
        }
    }

    #[test]
    fn test_accepts_powers_of_two_in_range() {
        for count in [2, 4, 8, 16, 256, 1024] {
            assert!(ShardManager::new(count, ShardStrategy::Balanced).is_ok());
        }
    }

    #[test]
    fn test_legacy_range_is_stricter() {
        assert!(ShardManager::new(8, ShardStrategy::LegacyModulo).is_err());
        assert!(ShardManager::new(128, ShardStrategy::LegacyModulo).is_err());
        assert!(ShardManager::new(16, ShardStrategy::LegacyModulo).is_ok());
        assert!(ShardManager::new(64, ShardStrategy::LegacyModulo).is_ok());
    }

    #[test]
    fn test_config_list_length_mismatch_is_fatal() {
        let mut config = ShardingConfig::for_shards(4);
        config.shards.pop();
        assert!(matches!(
            ShardManager::from_config(&config),
            Err(ShardError::ShardConfigMismatch {
                declared: 4,
                configured: 3
            })
        ));
    }

    #[test]
    fn test_bucket_masking() {
        for count in [2u32, 4, 16, 64] {
            let mgr = ShardManager::new(count, ShardStrategy::Balanced).unwrap();
            for bucket in [0u32, 1, 7, 255, 4096, u32::MAX] {
                assert_eq!(mgr.shard_for_bucket(bucket), bucket & (count - 1));
                // stable across repeated calls
                assert_eq!(mgr.shard_for_bucket(bucket), mgr.shard_for_bucket(bucket));
            }
        }
    }

    #[test]
    fn test_blacklist_roundtrip() {
        let mgr = ShardManager::new(4, ShardStrategy::Balanced).unwrap();
        assert!(mgr.live_shards().len() == 4);

        mgr.blacklist_shard(2).unwrap();
        assert!(mgr.is_blacklisted(2));
        assert!(mgr.blacklisted_since(2).is_some());
        let expected: BTreeSet<u32> = [2].into_iter().collect();
        assert_eq!(mgr.blacklisted_shards(), expected);
        assert_eq!(mgr.live_shards(), vec![0, 1, 3]);

        let health = mgr.health_status();
        assert!(!health[&2]);
        assert!(health[&0] && health[&1] && health[&3]);

        mgr.unblacklist_shard(2).unwrap();
        assert!(!mgr.is_blacklisted(2));
        assert!(mgr.health_status()[&2]);
    }

    #[test]
    fn test_blacklist_unknown_shard_rejected() {
        let mgr = ShardManager::new(4, ShardStrategy::Balanced).unwrap();
        assert!(matches!(
            mgr.blacklist_shard(9),
            Err(ShardError::UnknownShard(9))
        ));
        assert!(matches!(
            mgr.unblacklist_shard(9),
            Err(ShardError::UnknownShard(9))
        ));
    }

    #[test]
    fn test_blacklisting_all_shards_is_advisory() {
        let mgr = ShardManager::new(2, ShardStrategy::Balanced).unwrap();
        mgr.blacklist_shard(0).unwrap();
        mgr.blacklist_shard(1).unwrap();
        // not blocked; health surfaces the condition
        assert!(mgr.health_status().values().all(|healthy| !healthy));
        assert!(mgr.live_shards().is_empty());
    }
}

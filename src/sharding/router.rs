//! Shard Router - resolves a routing key to its shard
//!
//! Pairs a bucket extractor with the shard manager. Routing is deterministic
//! and infallible: the same key always resolves to the same shard for the
//! lifetime of a manager. A blacklisted target is reported, not rejected;
//! callers decide whether to proceed.

use std::sync::Arc;

use super::bucket::BucketExtractor;
use super::manager::ShardManager;

/// Routes keys of type `K` to shard indices.
pub struct ShardRouter<K: ?Sized = str> {
    manager: Arc<ShardManager>,
    extractor: Arc<dyn BucketExtractor<K>>,
}

impl<K: ?Sized> Clone for ShardRouter<K> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            extractor: Arc::clone(&self.extractor),
        }
    }
}

impl<K: ?Sized> ShardRouter<K> {
    pub fn new(manager: Arc<ShardManager>, extractor: Arc<dyn BucketExtractor<K>>) -> Self {
        Self { manager, extractor }
    }

    /// Resolve the shard for a routing key.
    pub fn shard_id(&self, key: &K) -> u32 {
        let bucket = self.extractor.bucket(key);
        let shard = self.manager.shard_for_bucket(bucket);
        if self.manager.is_blacklisted(shard) {
            log::debug!(
                "{} extractor routed key to blacklisted {}",
                self.extractor.name(),
                ShardManager::shard_name(shard)
            );
        }
        shard
    }

    pub fn manager(&self) -> &Arc<ShardManager> {
        &self.manager
    }
}

// ============================================================================
// Tests
// ============================================================================

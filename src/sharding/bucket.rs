//! Bucket Extractors - derive an intermediate bucket id from a routing key
//!
//! The bucket is the stable intermediate between a routing key and a shard:
//! the extractor hashes the key into bucket space, the shard manager masks the
//! bucket down to a shard index. Keeping the two hops separate lets the bucket
//! policy change (consistent hashing, legacy widths) without touching routing.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use ahash::AHasher;

/// Maps a routing key to a bucket id.
pub trait BucketExtractor<K: ?Sized>: Send + Sync {
    fn bucket(&self, key: &K) -> u32;

    /// Name of this extractor (for logging)
    fn name(&self) -> &str;
}

fn ahash64(key: &str) -> u64 {
    let mut hasher = AHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Hash Extractor
// ============================================================================

/// Uniform bucket derivation via ahash, folded to 32 bits.
///
/// Properties:
/// - Uniform distribution for arbitrary string keys
/// - No stability guarantee across key redistribution events
#[derive(Debug, Clone, Copy, Default)]
pub struct HashBucketExtractor;

impl BucketExtractor<str> for HashBucketExtractor {
    fn bucket(&self, key: &str) -> u32 {
        let hash = ahash64(key);
        (hash ^ (hash >> 32)) as u32
    }

    fn name(&self) -> &str {
        "hash"
    }
}

// ============================================================================
// Consistent-Hash Extractor
// ============================================================================

/// Consistent-hash bucket derivation over a virtual-node ring.
///
/// Each bucket owns `virtual_nodes` positions on a 64-bit ring; a key maps to
/// the first position at or after its hash (wrapping around). Minimizes bucket
/// movement when the bucket space is resized.
#[derive(Debug, Clone)]
pub struct ConsistentHashBucketExtractor {
    buckets: u32,
    virtual_nodes: u32,
    /// Ring: position hash -> bucket id
    ring: BTreeMap<u64, u32>,
}

impl ConsistentHashBucketExtractor {
    pub const DEFAULT_BUCKETS: u32 = 1024;
    pub const DEFAULT_VIRTUAL_NODES: u32 = 150;

    pub fn new() -> Self {
        Self::with_buckets(Self::DEFAULT_BUCKETS, Self::DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_buckets(buckets: u32, virtual_nodes: u32) -> Self {
        let mut ring = BTreeMap::new();
        for bucket in 0..buckets.max(1) {
            for vn in 0..virtual_nodes.max(1) {
                let mut hasher = AHasher::default();
                (bucket, vn).hash(&mut hasher);
                ring.insert(hasher.finish(), bucket);
            }
        }
        Self {
            buckets: buckets.max(1),
            virtual_nodes: virtual_nodes.max(1),
            ring,
        }
    }

    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    pub fn virtual_nodes(&self) -> u32 {
        self.virtual_nodes
    }

    fn ring_lookup(&self, hash: u64) -> u32 {
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next()) // Wrap around
            .map(|(_, &bucket)| bucket)
            .unwrap_or(0)
    }
}

impl Default for ConsistentHashBucketExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketExtractor<str> for ConsistentHashBucketExtractor {
    fn bucket(&self, key: &str) -> u32 {
        self.ring_lookup(ahash64(key))
    }

    fn name(&self) -> &str {
        "consistent_hash"
    }
}

// ============================================================================
// Legacy Modulo Extractor
// ============================================================================

/// Historical 16-bit bucket width.
pub const LEGACY_BUCKET_SPACE: u32 = 1 << 16;

/// Legacy bucket derivation: wrapping 31-multiplier string hash reduced
/// modulo the historical 16-bit bucket space. Kept for deployments whose
/// stored routing depends on the old bucket ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyModuloBucketExtractor;

impl BucketExtractor<str> for LegacyModuloBucketExtractor {
    fn bucket(&self, key: &str) -> u32 {
        let hash = key
            .chars()
            .fold(0u32, |acc, c| acc.wrapping_mul(31).wrapping_add(c as u32));
        hash % LEGACY_BUCKET_SPACE
    }

    fn name(&self) -> &str {
        "legacy_modulo"
    }
}

// ============================================================================
// Tests
// ============================================================================

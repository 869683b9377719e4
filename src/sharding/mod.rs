//! Shard Routing - maps routing keys to shards
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  ShardRouter                                             │
//! │  - key -> bucket -> shard, one deterministic hop each    │
//! ├──────────────────────────────────────────────────────────┤
//! │  BucketExtractor                                         │
//! │  - Hash (uniform, ahash)                                 │
//! │  - ConsistentHash (virtual-node ring)                    │
//! │  - LegacyModulo (historical 16-bit bucket width)         │
//! ├──────────────────────────────────────────────────────────┤
//! │  ShardManager                                            │
//! │  - Validated power-of-two shard count                    │
//! │  - bucket & (num_shards - 1) masking                     │
//! │  - Runtime blacklist + health snapshot                   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod bucket;
pub mod manager;
pub mod router;

pub use bucket::{
    BucketExtractor, ConsistentHashBucketExtractor, HashBucketExtractor, LegacyModuloBucketExtractor,
};
pub use manager::{ShardManager, ShardStrategy, MAX_SHARDS, MIN_SHARDS};
pub use router::ShardRouter;

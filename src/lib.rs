//! ShardBase - entity sharding layer for horizontally partitioned relational stores
//!
//! Routes entity operations across a fixed set of database shards, wraps every
//! operation in a composable observer pipeline (filtering, metrics, listeners),
//! and composes multi-step parent/child writes into single atomic transactions.
//!
//! The underlying database access layer is consumed through the narrow
//! [`session::Session`] / [`session::SessionFactory`] traits; an in-memory
//! implementation ships in [`session::memory`] for tests and embedded use.

pub mod config;
pub mod dao;
pub mod locked;
pub mod metrics;
pub mod query;
pub mod runtime;
pub mod scroll;
pub mod session;
pub mod sharding;
pub mod txn;

// Re-export main types
pub use config::{MetricsMode, ShardConnConfig, ShardingConfig, ShardingOptions};
pub use dao::ShardedDao;
pub use locked::{LockedContext, ReadOnlyContext};
pub use query::Criteria;
pub use runtime::ShardingRuntime;
pub use scroll::{ScrollDirection, ScrollPointStore, ScrollPointer, ScrollResult};
pub use session::{Entity, Session, SessionFactory};
pub use sharding::{BucketExtractor, ShardManager, ShardRouter, ShardStrategy};
pub use txn::{
    ExecutionContext, FilterVerdict, OpKind, TransactionExecutor, TransactionFilter,
    TransactionListener, TransactionObserver, TxnOp,
};

/// Sharding layer error type
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("invalid shard count {count}: must be a power of two in [{min}, {max}]")]
    InvalidShardCount { count: u32, min: u32, max: u32 },

    #[error("shard configuration mismatch: shard count is {declared} but {configured} shard connections are configured")]
    ShardConfigMismatch { declared: u32, configured: usize },

    #[error("unknown shard index {0}")]
    UnknownShard(u32),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metrics registration error: {0}")]
    Metrics(String),

    #[error("transaction blocked: {}", reasons.join("; "))]
    TransactionBlocked { reasons: Vec<String> },

    #[error("cannot lock missing entity: {0}")]
    LockTargetMissing(String),

    #[error("entity generator returned no entity")]
    GeneratorReturnedNothing,

    #[error("transactional operation already consumed")]
    OperationConsumed,

    #[error("session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, ShardError>;

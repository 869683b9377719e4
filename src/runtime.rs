//! Sharding Runtime - wires configuration into a running sharding layer
//!
//! The builder collects the session factory, the config, and every registered
//! extension (filters, listeners, observers). `build()` is the startup
//! boundary: it validates the shard topology fatally, applies the startup
//! blacklist, and freezes the observer pipeline. After that the runtime only
//! hands out DAOs and serves the admin surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ShardingConfig;
use crate::dao::ShardedDao;
use crate::metrics::TransactionMetrics;
use crate::scroll::{InMemoryScrollPointStore, ScrollPointStore};
use crate::session::{Entity, SessionFactory};
use crate::sharding::{BucketExtractor, ShardManager, ShardRouter};
use crate::txn::observer::{FilteringStage, ListenerStage, MetricsStage};
use crate::txn::{
    TransactionExecutor, TransactionFilter, TransactionListener, TransactionObserver,
    TransactionPipeline,
};
use crate::Result;

/// Collects registrations before the pipeline is frozen.
pub struct Builder<F: SessionFactory> {
    config: ShardingConfig,
    factory: Arc<F>,
    extractor: Option<Arc<dyn BucketExtractor<str>>>,
    filters: Vec<Arc<dyn TransactionFilter>>,
    listeners: Vec<Arc<dyn TransactionListener>>,
    observers: Vec<Arc<dyn TransactionObserver>>,
    scroll_points: Option<Arc<dyn ScrollPointStore>>,
}

impl<F: SessionFactory> Builder<F> {
    /// Register a policy filter (block/allow).
    pub fn register_filter(mut self, filter: impl TransactionFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Register a lifecycle listener (before/after/error hooks).
    pub fn register_listener(mut self, listener: impl TransactionListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Register a custom pipeline stage. User stages wrap the built-in ones
    /// in registration order, outermost first.
    pub fn register_observer(mut self, observer: impl TransactionObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Override the bucket extractor chosen by the configured strategy.
    pub fn bucket_extractor(mut self, extractor: Arc<dyn BucketExtractor<str>>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Override the default in-memory scroll point store.
    pub fn scroll_point_store(mut self, store: Arc<dyn ScrollPointStore>) -> Self {
        self.scroll_points = Some(store);
        self
    }

    /// Validate the topology and freeze the pipeline. Configuration errors
    /// here are fatal; the process should not start.
    pub fn build(self) -> Result<ShardingRuntime<F>> {
        let manager = Arc::new(ShardManager::from_config(&self.config)?);
        for &shard in &self.config.blacklist {
            manager.blacklist_shard(shard)?;
        }

        let metrics = Arc::new(TransactionMetrics::new(self.config.metrics.clone())?);

        // user observers outermost, then metrics, filtering, listeners;
        // the operation itself is the terminal position
        let mut stages: Vec<Arc<dyn TransactionObserver>> = self.observers;
        stages.push(Arc::new(MetricsStage::new(Arc::clone(&metrics))));
        stages.push(Arc::new(FilteringStage::new(self.filters)));
        stages.push(Arc::new(ListenerStage::new(self.listeners)));
        let pipeline = Arc::new(TransactionPipeline::new(stages));

        let executor = Arc::new(TransactionExecutor::new(
            pipeline,
            self.config.options.clone(),
        ));
        let extractor = self
            .extractor
            .unwrap_or_else(|| self.config.strategy.default_extractor());
        let router = ShardRouter::new(Arc::clone(&manager), extractor);
        let scroll_points = self
            .scroll_points
            .unwrap_or_else(|| Arc::new(InMemoryScrollPointStore::new()));

        log::info!(
            "sharding runtime ready: {} shards, {} blacklisted at startup",
            manager.num_shards(),
            manager.blacklisted_shards().len()
        );

        Ok(ShardingRuntime {
            manager,
            factory: self.factory,
            executor,
            router,
            metrics,
            scroll_points,
        })
    }
}

/// The running sharding layer: DAO factory plus the admin surface.
pub struct ShardingRuntime<F: SessionFactory> {
    manager: Arc<ShardManager>,
    factory: Arc<F>,
    executor: Arc<TransactionExecutor>,
    router: ShardRouter,
    metrics: Arc<TransactionMetrics>,
    scroll_points: Arc<dyn ScrollPointStore>,
}

impl<F: SessionFactory> ShardingRuntime<F> {
    pub fn builder(config: ShardingConfig, factory: F) -> Builder<F> {
        Builder {
            config,
            factory: Arc::new(factory),
            extractor: None,
            filters: Vec::new(),
            listeners: Vec::new(),
            observers: Vec::new(),
            scroll_points: None,
        }
    }

    /// DAO for one entity type.
    pub fn dao<E: Entity>(&self) -> ShardedDao<E, F> {
        ShardedDao::new(
            self.router.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.executor),
        )
    }

    pub fn shard_manager(&self) -> &Arc<ShardManager> {
        &self.manager
    }

    pub fn scroll_points(&self) -> &Arc<dyn ScrollPointStore> {
        &self.scroll_points
    }

    /// Prometheus registry backing the transaction metrics.
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.metrics.registry()
    }

    // ========================================================================
    // Admin surface
    // ========================================================================

    pub fn blacklist_shard(&self, shard: u32) -> Result<()> {
        self.manager.blacklist_shard(shard)
    }

    pub fn unblacklist_shard(&self, shard: u32) -> Result<()> {
        self.manager.unblacklist_shard(shard)
    }

    /// Per-shard health: healthy = not blacklisted.
    pub fn health_status(&self) -> BTreeMap<u32, bool> {
        self.manager.health_status()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsMode;
    use crate::query::Criteria;
    use crate::session::MemoryDb;
    use crate::txn::{ExecutionContext, FilterVerdict};
    use crate::ShardError;

    #[derive(Debug, Clone, PartialEq)]
    struct Account {
        id: u64,
        balance: i64,
    }

    impl Entity for Account {
        type Key = u64;

        fn key(&self) -> u64 {
            self.id
        }

        fn name() -> &'static str {
            "accounts"
        }
    }

    fn runtime(shards: u32) -> ShardingRuntime<MemoryDb> {
        ShardingRuntime::builder(ShardingConfig::for_shards(shards), MemoryDb::new(shards))
            .build()
            .unwrap()
    }

    #[test]
    fn test_invalid_shard_count_is_fatal() {
        let result =
            ShardingRuntime::builder(ShardingConfig::for_shards(3), MemoryDb::new(3)).build();
        assert!(matches!(result, Err(ShardError::InvalidShardCount { .. })));
    }

    #[test]
    fn test_config_mismatch_is_fatal() {
        let mut config = ShardingConfig::for_shards(4);
        config.shards.truncate(2);
        let result = ShardingRuntime::builder(config, MemoryDb::new(4)).build();
        assert!(matches!(result, Err(ShardError::ShardConfigMismatch { .. })));
    }

    #[test]
    fn test_startup_blacklist_applied() {
        let config = ShardingConfig::for_shards(4).with_blacklist(vec![1, 3]);
        let runtime = ShardingRuntime::builder(config, MemoryDb::new(4))
            .build()
            .unwrap();

        let health = runtime.health_status();
        assert!(health[&0] && health[&2]);
        assert!(!health[&1] && !health[&3]);
    }

    #[test]
    fn test_startup_blacklist_out_of_range_is_fatal() {
        let config = ShardingConfig::for_shards(2).with_blacklist(vec![7]);
        let result = ShardingRuntime::builder(config, MemoryDb::new(2)).build();
        assert!(matches!(result, Err(ShardError::UnknownShard(7))));
    }

    #[test]
    fn test_admin_blacklist_roundtrip() {
        let runtime = runtime(2);
        runtime.blacklist_shard(1).unwrap();
        assert!(!runtime.health_status()[&1]);
        runtime.unblacklist_shard(1).unwrap();
        assert!(runtime.health_status()[&1]);
    }

    #[test]
    fn test_dao_through_runtime() {
        let runtime = runtime(4);
        let dao = runtime.dao::<Account>();

        dao.save("acct-1", Account { id: 1, balance: 100 }).unwrap();
        assert_eq!(dao.get("acct-1", &1).unwrap().unwrap().balance, 100);
    }

    struct DenyWrites;

    impl TransactionFilter for DenyWrites {
        fn name(&self) -> &str {
            "deny_writes"
        }

        fn evaluate(&self, ctx: &ExecutionContext) -> crate::Result<FilterVerdict> {
            if ctx.command == "save" {
                Ok(FilterVerdict::Block("writes are frozen".to_string()))
            } else {
                Ok(FilterVerdict::Proceed)
            }
        }
    }

    #[test]
    fn test_registered_filter_blocks_matching_operations() {
        let runtime =
            ShardingRuntime::builder(ShardingConfig::for_shards(2), MemoryDb::new(2))
                .register_filter(DenyWrites)
                .build()
                .unwrap();
        let dao = runtime.dao::<Account>();

        let err = dao.save("acct-1", Account { id: 1, balance: 5 }).unwrap_err();
        match err {
            ShardError::TransactionBlocked { reasons } => {
                assert_eq!(reasons, vec!["writes are frozen".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // reads are unaffected
        assert!(dao.get("acct-1", &1).unwrap().is_none());
    }

    #[test]
    fn test_metrics_flow_through_pipeline() {
        let config = ShardingConfig::for_shards(2).with_metrics(MetricsMode::All);
        let runtime = ShardingRuntime::builder(config, MemoryDb::new(2))
            .register_filter(DenyWrites)
            .build()
            .unwrap();
        let dao = runtime.dao::<Account>();

        dao.select("acct-1", Criteria::all()).unwrap();
        let _ = dao.save("acct-1", Account { id: 1, balance: 5 });

        let families = runtime.metrics_registry().gather();
        let outcomes = families
            .iter()
            .find(|f| f.get_name() == "shardbase_ops_total")
            .unwrap();
        let mut success = 0.0;
        let mut blocked = 0.0;
        for metric in outcomes.get_metric() {
            let labels: Vec<(&str, &str)> = metric
                .get_label()
                .iter()
                .map(|l| (l.get_name(), l.get_value()))
                .collect();
            if labels.contains(&("outcome", "success")) {
                success += metric.get_counter().get_value();
            }
            if labels.contains(&("outcome", "blocked")) {
                blocked += metric.get_counter().get_value();
            }
        }
        assert_eq!(success, 1.0, "the select succeeded");
        assert_eq!(blocked, 1.0, "the blocked save counts as blocked, not failed");
    }

    #[test]
    fn test_scroll_store_is_shared() {
        let runtime = runtime(2);
        let store = runtime.scroll_points();
        let mut pointer = store.get_or_create("feed", crate::ScrollDirection::Ascending);
        pointer.advance(0, 3);
        store.put("feed", pointer);
        assert_eq!(
            store
                .get_or_create("feed", crate::ScrollDirection::Ascending)
                .offset(0),
            3
        );
    }
}

//! Observer Pipeline - cross-cutting stages around every executed operation
//!
//! The pipeline is an ordered list of stages walked by an index cursor; the
//! end of the list is the terminal position where the wrapped operation itself
//! runs. Each stage decides whether and how to call `chain.proceed`, exactly
//! like a middleware layer.
//!
//! Assembly order (outermost first): user-registered observers, then metrics,
//! then filtering, then listener triggering. Filters sit closest to the
//! operation so a blocked transaction never reaches it; the metrics stage
//! above classifies the block as its own outcome, never as an executed
//! success or failure.

use std::sync::Arc;
use std::time::Instant;

use super::executor::ExecutionContext;
use super::filter::{FilterVerdict, TransactionFilter};
use super::listener::TransactionListener;
use crate::metrics::TransactionMetrics;
use crate::{Result, ShardError};

/// A pipeline stage wrapping every executed operation.
///
/// Implementations call `chain.proceed(ctx)` to continue toward the operation,
/// or return early to suppress it.
pub trait TransactionObserver: Send + Sync {
    fn observe(&self, ctx: &ExecutionContext, chain: &mut ObserverChain<'_, '_>) -> Result<()>;
}

/// The frozen, ordered stage list. Built once at runtime construction and
/// immutable afterwards.
pub struct TransactionPipeline {
    stages: Vec<Arc<dyn TransactionObserver>>,
}

impl TransactionPipeline {
    pub fn new(stages: Vec<Arc<dyn TransactionObserver>>) -> Self {
        Self { stages }
    }

    /// Run the supplier through every stage in order.
    pub fn execute(
        &self,
        ctx: &ExecutionContext,
        supplier: &mut (dyn FnMut() -> Result<()> + '_),
    ) -> Result<()> {
        let mut chain = ObserverChain {
            stages: &self.stages,
            index: 0,
            supplier,
        };
        chain.proceed(ctx)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Index cursor over the pipeline's stages. Past the last stage, `proceed`
/// invokes the wrapped operation (the terminal position).
pub struct ObserverChain<'a, 'b> {
    stages: &'a [Arc<dyn TransactionObserver>],
    index: usize,
    supplier: &'a mut (dyn FnMut() -> Result<()> + 'b),
}

impl ObserverChain<'_, '_> {
    pub fn proceed(&mut self, ctx: &ExecutionContext) -> Result<()> {
        match self.stages.get(self.index) {
            Some(stage) => {
                let stage = Arc::clone(stage);
                self.index += 1;
                stage.observe(ctx, self)
            }
            None => (self.supplier)(),
        }
    }
}

// ============================================================================
// Filtering Stage
// ============================================================================

/// Evaluates every registered filter; if any block, raises one error carrying
/// all collected reasons. Filters are not short-circuited. A filter error is
/// fail-open: logged, treated as Proceed.
pub(crate) struct FilteringStage {
    filters: Vec<Arc<dyn TransactionFilter>>,
}

impl FilteringStage {
    pub(crate) fn new(filters: Vec<Arc<dyn TransactionFilter>>) -> Self {
        Self { filters }
    }
}

impl TransactionObserver for FilteringStage {
    fn observe(&self, ctx: &ExecutionContext, chain: &mut ObserverChain<'_, '_>) -> Result<()> {
        let mut reasons = Vec::new();
        for filter in &self.filters {
            match filter.evaluate(ctx) {
                Ok(FilterVerdict::Proceed) => {}
                Ok(FilterVerdict::Block(reason)) => reasons.push(reason),
                Err(err) => {
                    log::warn!(
                        "filter {} failed during {} on {}: {}; allowing",
                        filter.name(),
                        ctx.command,
                        ctx.shard,
                        err
                    );
                }
            }
        }
        if !reasons.is_empty() {
            return Err(ShardError::TransactionBlocked { reasons });
        }
        chain.proceed(ctx)
    }
}

// ============================================================================
// Metrics Stage
// ============================================================================

/// Times and counts operations for entities the metrics config covers.
/// Durations are recorded on every path; a policy block is its own outcome,
/// distinct from success and failure.
pub(crate) struct MetricsStage {
    metrics: Arc<TransactionMetrics>,
}

impl MetricsStage {
    pub(crate) fn new(metrics: Arc<TransactionMetrics>) -> Self {
        Self { metrics }
    }
}

impl TransactionObserver for MetricsStage {
    fn observe(&self, ctx: &ExecutionContext, chain: &mut ObserverChain<'_, '_>) -> Result<()> {
        if !self.metrics.enabled_for(ctx.entity) {
            return chain.proceed(ctx);
        }
        self.metrics.mark_total(ctx);
        let start = Instant::now();
        let result = chain.proceed(ctx);
        let elapsed = start.elapsed();
        match &result {
            Ok(()) => self.metrics.mark_success(ctx),
            Err(ShardError::TransactionBlocked { .. }) => self.metrics.mark_blocked(ctx),
            Err(_) => self.metrics.mark_failed(ctx),
        }
        self.metrics.observe_duration(ctx, elapsed);
        result
    }
}

// ============================================================================
// Listener Stage
// ============================================================================

/// Triggers registered listeners around the operation. Every hook invocation
/// is isolated: one listener's error is logged without affecting the others
/// or the transaction.
pub(crate) struct ListenerStage {
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl ListenerStage {
    pub(crate) fn new(listeners: Vec<Arc<dyn TransactionListener>>) -> Self {
        Self { listeners }
    }
}

impl TransactionObserver for ListenerStage {
    fn observe(&self, ctx: &ExecutionContext, chain: &mut ObserverChain<'_, '_>) -> Result<()> {
        for listener in &self.listeners {
            if let Err(err) = listener.before_execute(ctx) {
                log::warn!("listener {} before_execute failed: {}", listener.name(), err);
            }
        }
        let result = chain.proceed(ctx);
        match &result {
            Ok(()) => {
                for listener in &self.listeners {
                    if let Err(err) = listener.after_execute(ctx) {
                        log::warn!("listener {} after_execute failed: {}", listener.name(), err);
                    }
                }
            }
            Err(error) => {
                for listener in &self.listeners {
                    if let Err(err) = listener.after_error(ctx, error) {
                        log::warn!("listener {} after_error failed: {}", listener.name(), err);
                    }
                }
            }
        }
        result
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::op::OpKind;
    use parking_lot::Mutex;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            command: "save",
            shard: "shard_00".to_string(),
            entity: "orders",
            op: OpKind::Save,
        }
    }

    type Trace = Arc<Mutex<Vec<String>>>;

    struct Tracing {
        label: &'static str,
        trace: Trace,
    }

    impl TransactionObserver for Tracing {
        fn observe(&self, ctx: &ExecutionContext, chain: &mut ObserverChain<'_, '_>) -> Result<()> {
            self.trace.lock().push(format!("{}:enter", self.label));
            let result = chain.proceed(ctx);
            self.trace.lock().push(format!("{}:exit", self.label));
            result
        }
    }

    struct Blocking(&'static str);

    impl TransactionFilter for Blocking {
        fn evaluate(&self, _ctx: &ExecutionContext) -> Result<FilterVerdict> {
            Ok(FilterVerdict::Block(self.0.to_string()))
        }
    }

    struct Allowing;

    impl TransactionFilter for Allowing {
        fn evaluate(&self, _ctx: &ExecutionContext) -> Result<FilterVerdict> {
            Ok(FilterVerdict::Proceed)
        }
    }

    struct Broken;

    impl TransactionFilter for Broken {
        fn evaluate(&self, _ctx: &ExecutionContext) -> Result<FilterVerdict> {
            Err(ShardError::Session("filter bug".to_string()))
        }
    }

    #[test]
    fn test_stages_wrap_in_order() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let pipeline = TransactionPipeline::new(vec![
            Arc::new(Tracing { label: "outer", trace: trace.clone() }),
            Arc::new(Tracing { label: "inner", trace: trace.clone() }),
        ]);

        let trace2 = trace.clone();
        let mut supplier = move || {
            trace2.lock().push("op".to_string());
            Ok(())
        };
        pipeline.execute(&ctx(), &mut supplier).unwrap();

        assert_eq!(
            *trace.lock(),
            vec!["outer:enter", "inner:enter", "op", "inner:exit", "outer:exit"]
        );
    }

    #[test]
    fn test_empty_pipeline_calls_supplier() {
        let pipeline = TransactionPipeline::new(Vec::new());
        let mut calls = 0;
        let mut supplier = || {
            calls += 1;
            Ok(())
        };
        pipeline.execute(&ctx(), &mut supplier).unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_all_block_reasons_are_collected() {
        let pipeline = TransactionPipeline::new(vec![Arc::new(FilteringStage::new(vec![
            Arc::new(Blocking("X")),
            Arc::new(Allowing),
            Arc::new(Blocking("Y")),
        ]))]);

        let mut ran = false;
        let mut supplier = || {
            ran = true;
            Ok(())
        };
        let err = pipeline.execute(&ctx(), &mut supplier).unwrap_err();
        match err {
            ShardError::TransactionBlocked { reasons } => {
                assert_eq!(reasons, vec!["X".to_string(), "Y".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!ran, "a blocked transaction must never reach the operation");
    }

    #[test]
    fn test_broken_filter_fails_open() {
        let pipeline = TransactionPipeline::new(vec![Arc::new(FilteringStage::new(vec![
            Arc::new(Broken),
            Arc::new(Allowing),
        ]))]);

        let mut ran = false;
        let mut supplier = || {
            ran = true;
            Ok(())
        };
        pipeline.execute(&ctx(), &mut supplier).unwrap();
        assert!(ran);
    }

    struct Hooks {
        trace: Trace,
        fail_before: bool,
    }

    impl TransactionListener for Hooks {
        fn before_execute(&self, _ctx: &ExecutionContext) -> Result<()> {
            self.trace.lock().push("before".to_string());
            if self.fail_before {
                return Err(ShardError::Session("listener bug".to_string()));
            }
            Ok(())
        }

        fn after_execute(&self, _ctx: &ExecutionContext) -> Result<()> {
            self.trace.lock().push("after".to_string());
            Ok(())
        }

        fn after_error(&self, _ctx: &ExecutionContext, _error: &ShardError) -> Result<()> {
            self.trace.lock().push("error".to_string());
            Ok(())
        }
    }

    #[test]
    fn test_listener_errors_never_break_the_transaction() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let pipeline = TransactionPipeline::new(vec![Arc::new(ListenerStage::new(vec![
            Arc::new(Hooks { trace: trace.clone(), fail_before: true }),
            Arc::new(Hooks { trace: trace.clone(), fail_before: false }),
        ]))]);

        let mut supplier = || Ok(());
        pipeline.execute(&ctx(), &mut supplier).unwrap();
        // both listeners ran both hooks despite the first one failing
        assert_eq!(*trace.lock(), vec!["before", "before", "after", "after"]);
    }

    #[test]
    fn test_listeners_see_failures() {
        let trace: Trace = Arc::new(Mutex::new(Vec::new()));
        let pipeline = TransactionPipeline::new(vec![Arc::new(ListenerStage::new(vec![
            Arc::new(Hooks { trace: trace.clone(), fail_before: false }),
        ]))]);

        let mut supplier = || Err(ShardError::Session("db down".to_string()));
        assert!(pipeline.execute(&ctx(), &mut supplier).is_err());
        assert_eq!(*trace.lock(), vec!["before", "error"]);
    }
}

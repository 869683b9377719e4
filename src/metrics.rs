//! Transaction Metrics - per-entity-operation and per-shard timers/counters
//!
//! Backed by an instance-owned prometheus `Registry` so embedding hosts can
//! scrape or merge it as they see fit; nothing is registered globally. Label
//! children are created lazily by the prometheus vectors: concurrent first
//! access races safely and converges on one child per label set.
//!
//! Outcomes: `total` is marked before the operation runs, then exactly one of
//! `success`, `failed`, or `blocked` after. A policy block is never counted as
//! an executed failure.

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::config::MetricsMode;
use crate::txn::ExecutionContext;
use crate::{Result, ShardError};

pub struct TransactionMetrics {
    registry: Registry,
    mode: MetricsMode,
    /// Operation latency by {entity, op}
    op_duration: HistogramVec,
    /// Outcome counts by {entity, op, outcome}
    op_outcomes: IntCounterVec,
    /// Operation latency by {shard}
    shard_duration: HistogramVec,
    /// Outcome counts by {shard, outcome}
    shard_outcomes: IntCounterVec,
}

fn metrics_err(err: prometheus::Error) -> ShardError {
    ShardError::Metrics(err.to_string())
}

impl TransactionMetrics {
    pub fn new(mode: MetricsMode) -> Result<Self> {
        let registry = Registry::new();

        let op_duration = HistogramVec::new(
            HistogramOpts::new(
                "shardbase_op_duration_seconds",
                "Operation latency by entity and operation",
            ),
            &["entity", "op"],
        )
        .map_err(metrics_err)?;
        let op_outcomes = IntCounterVec::new(
            Opts::new(
                "shardbase_ops_total",
                "Operation outcomes by entity and operation",
            ),
            &["entity", "op", "outcome"],
        )
        .map_err(metrics_err)?;
        let shard_duration = HistogramVec::new(
            HistogramOpts::new(
                "shardbase_shard_op_duration_seconds",
                "Operation latency by shard",
            ),
            &["shard"],
        )
        .map_err(metrics_err)?;
        let shard_outcomes = IntCounterVec::new(
            Opts::new("shardbase_shard_ops_total", "Operation outcomes by shard"),
            &["shard", "outcome"],
        )
        .map_err(metrics_err)?;

        registry
            .register(Box::new(op_duration.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(op_outcomes.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(shard_duration.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(shard_outcomes.clone()))
            .map_err(metrics_err)?;

        Ok(Self {
            registry,
            mode,
            op_duration,
            op_outcomes,
            shard_duration,
            shard_outcomes,
        })
    }

    /// Whether metrics are recorded for the given entity.
    pub fn enabled_for(&self, entity: &str) -> bool {
        self.mode.applies_to(entity)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn mark_total(&self, ctx: &ExecutionContext) {
        self.mark(ctx, "total");
    }

    pub(crate) fn mark_success(&self, ctx: &ExecutionContext) {
        self.mark(ctx, "success");
    }

    pub(crate) fn mark_failed(&self, ctx: &ExecutionContext) {
        self.mark(ctx, "failed");
    }

    pub(crate) fn mark_blocked(&self, ctx: &ExecutionContext) {
        self.mark(ctx, "blocked");
    }

    pub(crate) fn observe_duration(&self, ctx: &ExecutionContext, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.op_duration
            .with_label_values(&[ctx.entity, ctx.op.as_str()])
            .observe(secs);
        self.shard_duration
            .with_label_values(&[ctx.shard.as_str()])
            .observe(secs);
    }

    fn mark(&self, ctx: &ExecutionContext, outcome: &str) {
        self.op_outcomes
            .with_label_values(&[ctx.entity, ctx.op.as_str(), outcome])
            .inc();
        self.shard_outcomes
            .with_label_values(&[ctx.shard.as_str(), outcome])
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn outcome_count(&self, entity: &str, op: &str, outcome: &str) -> u64 {
        self.op_outcomes
            .with_label_values(&[entity, op, outcome])
            .get()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::OpKind;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            command: "save",
            shard: "shard_00".to_string(),
            entity: "orders",
            op: OpKind::Save,
        }
    }

    #[test]
    fn test_outcomes_are_counted_separately() {
        let metrics = TransactionMetrics::new(MetricsMode::All).unwrap();
        let ctx = ctx();
        metrics.mark_total(&ctx);
        metrics.mark_total(&ctx);
        metrics.mark_success(&ctx);
        metrics.mark_blocked(&ctx);

        assert_eq!(metrics.outcome_count("orders", "save", "total"), 2);
        assert_eq!(metrics.outcome_count("orders", "save", "success"), 1);
        assert_eq!(metrics.outcome_count("orders", "save", "blocked"), 1);
        assert_eq!(metrics.outcome_count("orders", "save", "failed"), 0);
    }

    #[test]
    fn test_durations_register_samples() {
        let metrics = TransactionMetrics::new(MetricsMode::All).unwrap();
        metrics.observe_duration(&ctx(), Duration::from_millis(5));

        let families = metrics.registry().gather();
        let histogram = families
            .iter()
            .find(|f| f.get_name() == "shardbase_op_duration_seconds")
            .unwrap();
        assert_eq!(histogram.get_metric()[0].get_histogram().get_sample_count(), 1);
    }

    #[test]
    fn test_enablement_follows_mode() {
        let all = TransactionMetrics::new(MetricsMode::All).unwrap();
        assert!(all.enabled_for("anything"));

        let off = TransactionMetrics::new(MetricsMode::Disabled).unwrap();
        assert!(!off.enabled_for("anything"));

        let some = TransactionMetrics::new(MetricsMode::Entities(
            ["orders".to_string()].into_iter().collect(),
        ))
        .unwrap();
        assert!(some.enabled_for("orders"));
        assert!(!some.enabled_for("users"));
    }
}

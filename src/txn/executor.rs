//! Transaction Executor - runs one operation against one shard
//!
//! Builds the immutable execution context, then sends the operation through
//! the observer pipeline wrapped in a supplier that opens the transaction
//! handler, applies the op, and commits or rolls back. The original error is
//! always the one that surfaces, after rollback has been triggered.

use std::sync::Arc;

use super::handler::TransactionHandler;
use super::observer::TransactionPipeline;
use super::op::{OpKind, OpResult, TxnOp};
use crate::config::ShardingOptions;
use crate::session::{Entity, Session, SessionFactory};
use crate::sharding::ShardManager;
use crate::{Result, ShardError};

/// Immutable record of one executed operation. Created fresh per execution;
/// read-only for observers, filters, and listeners.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// DAO-level command name, e.g. "save", "lock_and_execute"
    pub command: &'static str,
    /// Shard display name, e.g. "shard_03"
    pub shard: String,
    /// Entity name the operation targets
    pub entity: &'static str,
    /// Operation kind
    pub op: OpKind,
}

/// Executes operations through the frozen observer pipeline.
pub struct TransactionExecutor {
    pipeline: Arc<TransactionPipeline>,
    options: ShardingOptions,
}

impl TransactionExecutor {
    pub fn new(pipeline: Arc<TransactionPipeline>, options: ShardingOptions) -> Self {
        Self { pipeline, options }
    }

    pub fn pipeline(&self) -> &Arc<TransactionPipeline> {
        &self.pipeline
    }

    /// Run an operation in its own complete transaction: open a session on
    /// the shard, begin, apply, commit on success or roll back on error.
    pub fn execute<E: Entity, F: SessionFactory>(
        &self,
        factory: &F,
        read_only: bool,
        command: &'static str,
        op: TxnOp<E, F::Session>,
        shard: u32,
    ) -> Result<OpResult<E>> {
        let ctx = ExecutionContext {
            command,
            shard: ShardManager::shard_name(shard),
            entity: E::name(),
            op: op.kind(),
        };
        log::debug!("executing {} ({}) on {}", ctx.command, ctx.op, ctx.shard);

        let mut op = Some(op);
        let mut result: Option<OpResult<E>> = None;
        let options = &self.options;
        let mut supplier = || -> Result<()> {
            let op = op.take().ok_or(ShardError::OperationConsumed)?;
            let session = factory.open_session(shard)?;
            let mut handler = TransactionHandler::new(session, read_only, options);
            handler.before_start()?;
            match op.apply(handler.session_mut()) {
                Ok(value) => {
                    handler.after_end()?;
                    result = Some(value);
                    Ok(())
                }
                Err(err) => {
                    handler.on_error();
                    Err(err)
                }
            }
        };
        self.pipeline.execute(&ctx, &mut supplier)?;
        result.ok_or(ShardError::OperationConsumed)
    }

    /// Run an operation inside an already-open outer transaction scope. The
    /// pipeline still wraps it; begin/commit/rollback stay with the owner of
    /// the outer handler. Used by locked contexts to compose several
    /// operations into one transaction.
    pub fn execute_in_session<E: Entity, S: Session>(
        &self,
        command: &'static str,
        shard: u32,
        op: TxnOp<E, S>,
        session: &mut S,
    ) -> Result<OpResult<E>> {
        let ctx = ExecutionContext {
            command,
            shard: ShardManager::shard_name(shard),
            entity: E::name(),
            op: op.kind(),
        };
        let mut op = Some(op);
        let mut result: Option<OpResult<E>> = None;
        let mut supplier = || -> Result<()> {
            let op = op.take().ok_or(ShardError::OperationConsumed)?;
            result = Some(op.apply(session)?);
            Ok(())
        };
        self.pipeline.execute(&ctx, &mut supplier)?;
        result.ok_or(ShardError::OperationConsumed)
    }
}

// ============================================================================
// Tests
// ============================================================================

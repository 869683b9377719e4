//! Locked Contexts - atomic parent + children composition
//!
//! Builder-style orchestrators over one transaction: acquire (lock or create)
//! a parent entity, then run dependent operations in registration order before
//! the lock-holding transaction commits. Contexts are single-use; `execute`
//! consumes the builder, so no operation can be added afterwards.

use std::sync::Arc;

use crate::query::Criteria;
use crate::session::{Entity, Session, SessionFactory};
use crate::txn::{Acquire, ChildOp, OpResult, TransactionExecutor, TxnOp};
use crate::{Result, ShardError};

/// Accumulates dependent operations to run atomically with a parent
/// lock/insert. Built by the DAO's `lock_and_get_executor` /
/// `save_and_get_executor` entry points.
pub struct LockedContext<E: Entity, F: SessionFactory> {
    shard: u32,
    factory: Arc<F>,
    executor: Arc<TransactionExecutor>,
    command: &'static str,
    acquire: Acquire<E, F::Session>,
    operations: Vec<ChildOp<E, F::Session>>,
}

impl<E: Entity, F: SessionFactory> LockedContext<E, F> {
    pub(crate) fn new(
        shard: u32,
        factory: Arc<F>,
        executor: Arc<TransactionExecutor>,
        command: &'static str,
        acquire: Acquire<E, F::Session>,
    ) -> Self {
        Self {
            shard,
            factory,
            executor,
            command,
            acquire,
            operations: Vec::new(),
        }
    }

    /// Rewrite the locked parent; a `None` mutator result skips the write.
    pub fn mutate(mut self, mutator: impl Fn(&E) -> Option<E> + Send + 'static) -> Self {
        self.operations.push(Box::new(move |session, parent| {
            match mutator(parent) {
                Some(new) => session.update(new),
                None => Ok(()),
            }
        }));
        self
    }

    /// Run an arbitrary dependent operation over the session and the locked
    /// parent.
    pub fn apply(
        mut self,
        operation: impl FnOnce(&mut F::Session, &E) -> Result<()> + Send + 'static,
    ) -> Self {
        self.operations.push(Box::new(operation));
        self
    }

    /// Save a child entity derived from the locked parent.
    pub fn save_child<C: Entity>(
        mut self,
        build: impl FnOnce(&E) -> C + Send + 'static,
    ) -> Self {
        self.operations.push(Box::new(move |session, parent| {
            session.insert(build(parent)).map(|_| ())
        }));
        self
    }

    /// Create-or-update a child row within the locked transaction. Composed
    /// through the executor so the observer pipeline sees it as its own
    /// operation inside the open transaction scope.
    pub fn create_or_update<C: Entity>(
        mut self,
        criteria: Criteria<C>,
        mutator: impl Fn(&C) -> Option<C> + Send + 'static,
        generator: impl FnOnce(&E) -> Option<C> + Send + 'static,
    ) -> Self {
        let executor = Arc::clone(&self.executor);
        let shard = self.shard;
        self.operations.push(Box::new(move |session, parent| {
            let parent = parent.clone();
            let op = TxnOp::<C, F::Session>::CreateOrUpdate {
                criteria,
                mutator: Box::new(mutator),
                generator: Box::new(move || generator(&parent)),
                locked: true,
            };
            executor
                .execute_in_session("create_or_update", shard, op, session)
                .map(|_| ())
        }));
        self
    }

    /// Run everything in one transaction and return the locked parent.
    pub fn execute(self) -> Result<E> {
        let op = TxnOp::LockAndExecute {
            acquire: self.acquire,
            operations: self.operations,
        };
        let result = self
            .executor
            .execute(&*self.factory, false, self.command, op, self.shard)?;
        match result {
            OpResult::Entity(Some(parent)) => Ok(parent),
            _ => Err(ShardError::Session(
                "lock context produced no entity".to_string(),
            )),
        }
    }
}

/// Read-oriented counterpart: fetch by key, optionally backfilling a missing
/// row once before a single retry fetch.
pub struct ReadOnlyContext<E: Entity, F: SessionFactory> {
    shard: u32,
    factory: Arc<F>,
    executor: Arc<TransactionExecutor>,
    key: E::Key,
    populator: Option<Box<dyn FnOnce(&mut F::Session) -> Result<()> + Send>>,
}

impl<E: Entity, F: SessionFactory> ReadOnlyContext<E, F> {
    pub(crate) fn new(
        shard: u32,
        factory: Arc<F>,
        executor: Arc<TransactionExecutor>,
        key: E::Key,
    ) -> Self {
        Self {
            shard,
            factory,
            executor,
            key,
            populator: None,
        }
    }

    /// Backfill hook invoked once when the key is absent (e.g. lazily loading
    /// from a cold store), followed by exactly one retry fetch.
    pub fn populate_if_absent(
        mut self,
        populate: impl FnOnce(&mut F::Session) -> Result<()> + Send + 'static,
    ) -> Self {
        self.populator = Some(Box::new(populate));
        self
    }

    pub fn execute(self) -> Result<Option<E>> {
        // a populator may write, so only the populator-free path rides the
        // read-only transaction
        let read_only = self.populator.is_none();
        let op = TxnOp::ReadOnly {
            key: self.key,
            populator: self.populator,
        };
        Ok(self
            .executor
            .execute(&*self.factory, read_only, "read_only", op, self.shard)?
            .entity())
    }
}

// ============================================================================
// Tests
// ============================================================================

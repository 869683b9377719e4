//! Sharded DAO - the caller-facing surface
//!
//! Every method routes by a string parent key, builds the matching
//! transactional operation, and hands it to the executor against the resolved
//! shard. Multi-step flows return builder contexts (`LockedContext`,
//! `ReadOnlyContext`) instead of executing eagerly.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::locked::{LockedContext, ReadOnlyContext};
use crate::query::Criteria;
use crate::scroll::{self, ScrollPointer, ScrollResult};
use crate::session::{Entity, Session, SessionFactory};
use crate::sharding::ShardRouter;
use crate::txn::{Acquire, TransactionExecutor, TxnOp};
use crate::Result;

/// Data access object for one entity type across all shards.
pub struct ShardedDao<E: Entity, F: SessionFactory> {
    router: ShardRouter,
    factory: Arc<F>,
    executor: Arc<TransactionExecutor>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, F: SessionFactory> Clone for ShardedDao<E, F> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            factory: Arc::clone(&self.factory),
            executor: Arc::clone(&self.executor),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity, F: SessionFactory> ShardedDao<E, F> {
    pub(crate) fn new(
        router: ShardRouter,
        factory: Arc<F>,
        executor: Arc<TransactionExecutor>,
    ) -> Self {
        Self {
            router,
            factory,
            executor,
            _entity: PhantomData,
        }
    }

    /// Shard a parent key routes to.
    pub fn shard_for(&self, parent_key: &str) -> u32 {
        self.router.shard_id(parent_key)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn save(&self, parent_key: &str, entity: E) -> Result<Option<E>> {
        let shard = self.shard_for(parent_key);
        Ok(self
            .executor
            .execute(&*self.factory, false, "save", TxnOp::Save { entity }, shard)?
            .entity())
    }

    /// Save a batch in one transaction; any failure aborts the whole batch.
    pub fn save_all(&self, parent_key: &str, entities: Vec<E>) -> Result<Vec<E>> {
        let shard = self.shard_for(parent_key);
        Ok(self
            .executor
            .execute(&*self.factory, false, "save_all", TxnOp::SaveAll { entities }, shard)?
            .entities())
    }

    /// Read the row under a lock, apply the mutator, persist its result.
    /// Returns `false` when the row is missing or the mutator declines.
    pub fn update(
        &self,
        parent_key: &str,
        key: &E::Key,
        mutator: impl Fn(&E) -> Option<E> + Send + 'static,
    ) -> Result<bool> {
        let shard = self.shard_for(parent_key);
        let op = TxnOp::Update {
            key: key.clone(),
            mutator: Box::new(mutator),
        };
        Ok(self
            .executor
            .execute(&*self.factory, false, "update", op, shard)?
            .updated())
    }

    /// Apply the mutator to every criteria match; returns the updated count.
    pub fn update_all(
        &self,
        parent_key: &str,
        criteria: Criteria<E>,
        mutator: impl Fn(&E) -> Option<E> + Send + 'static,
    ) -> Result<u64> {
        let shard = self.shard_for(parent_key);
        let op = TxnOp::UpdateAll {
            criteria,
            mutator: Box::new(mutator),
        };
        Ok(self
            .executor
            .execute(&*self.factory, false, "update_all", op, shard)?
            .count())
    }

    /// Lookup-key variant of `update`: plain read, then mutate.
    pub fn get_and_update(
        &self,
        parent_key: &str,
        key: &E::Key,
        mutator: impl Fn(&E) -> Option<E> + Send + 'static,
    ) -> Result<bool> {
        let shard = self.shard_for(parent_key);
        let op = TxnOp::GetAndUpdate {
            key: key.clone(),
            mutator: Box::new(mutator),
        };
        Ok(self
            .executor
            .execute(&*self.factory, false, "get_and_update", op, shard)?
            .updated())
    }

    /// Mutate the first row of the criteria result set only.
    pub fn select_and_update(
        &self,
        parent_key: &str,
        criteria: Criteria<E>,
        mutator: impl Fn(&E) -> Option<E> + Send + 'static,
    ) -> Result<bool> {
        let shard = self.shard_for(parent_key);
        let op = TxnOp::SelectAndUpdate {
            criteria,
            mutator: Box::new(mutator),
        };
        Ok(self
            .executor
            .execute(&*self.factory, false, "select_and_update", op, shard)?
            .updated())
    }

    /// Update the first criteria match, or save a generated entity when there
    /// is none. Returns the persisted entity, or `None` when the mutator
    /// declined the update.
    pub fn create_or_update(
        &self,
        parent_key: &str,
        criteria: Criteria<E>,
        mutator: impl Fn(&E) -> Option<E> + Send + 'static,
        generator: impl FnOnce() -> Option<E> + Send + 'static,
    ) -> Result<Option<E>> {
        let shard = self.shard_for(parent_key);
        let op = TxnOp::CreateOrUpdate {
            criteria,
            mutator: Box::new(mutator),
            generator: Box::new(generator),
            locked: false,
        };
        Ok(self
            .executor
            .execute(&*self.factory, false, "create_or_update", op, shard)?
            .entity())
    }

    /// Cursor-walk the criteria matches, mutating row by row while the
    /// continuation predicate holds. Returns the updated count.
    pub fn update_with_scroll(
        &self,
        parent_key: &str,
        criteria: Criteria<E>,
        mutator: impl Fn(&E) -> Option<E> + Send + 'static,
        update_next: impl FnMut(u64, &E) -> bool + Send + 'static,
    ) -> Result<u64> {
        let shard = self.shard_for(parent_key);
        let op = TxnOp::UpdateWithScroll {
            criteria,
            mutator: Box::new(mutator),
            update_next: Box::new(update_next),
        };
        Ok(self
            .executor
            .execute(&*self.factory, false, "update_with_scroll", op, shard)?
            .count())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, parent_key: &str, key: &E::Key) -> Result<Option<E>> {
        let shard = self.shard_for(parent_key);
        let op = TxnOp::ReadOnly {
            key: key.clone(),
            populator: None,
        };
        Ok(self
            .executor
            .execute(&*self.factory, true, "get", op, shard)?
            .entity())
    }

    pub fn select(&self, parent_key: &str, criteria: Criteria<E>) -> Result<Vec<E>> {
        let shard = self.shard_for(parent_key);
        Ok(self
            .executor
            .execute(&*self.factory, true, "select", TxnOp::Select { criteria }, shard)?
            .entities())
    }

    pub fn count(&self, parent_key: &str, criteria: Criteria<E>) -> Result<u64> {
        let shard = self.shard_for(parent_key);
        Ok(self
            .executor
            .execute(&*self.factory, true, "count", TxnOp::Count { criteria }, shard)?
            .count())
    }

    // ========================================================================
    // Composite contexts
    // ========================================================================

    /// Lock an existing parent row by key, then compose dependent operations.
    pub fn lock_and_get_executor(&self, parent_key: &str, key: &E::Key) -> LockedContext<E, F> {
        let shard = self.shard_for(parent_key);
        let key = key.clone();
        LockedContext::new(
            shard,
            Arc::clone(&self.factory),
            Arc::clone(&self.executor),
            "lock_and_execute",
            Acquire::Read {
                getter: Box::new(move |session: &mut F::Session| {
                    session.get_for_update::<E>(&key)
                }),
            },
        )
    }

    /// Lock the first criteria match, then compose dependent operations.
    pub fn select_and_lock_executor(
        &self,
        parent_key: &str,
        criteria: Criteria<E>,
    ) -> LockedContext<E, F> {
        let shard = self.shard_for(parent_key);
        LockedContext::new(
            shard,
            Arc::clone(&self.factory),
            Arc::clone(&self.executor),
            "lock_and_execute",
            Acquire::Read {
                getter: Box::new(move |session: &mut F::Session| {
                    Ok(session.select_for_update(&criteria)?.into_iter().next())
                }),
            },
        )
    }

    /// Save a new parent, then compose dependent operations around it.
    pub fn save_and_get_executor(&self, parent_key: &str, entity: E) -> LockedContext<E, F> {
        let shard = self.shard_for(parent_key);
        LockedContext::new(
            shard,
            Arc::clone(&self.factory),
            Arc::clone(&self.executor),
            "save_and_execute",
            Acquire::Insert { entity },
        )
    }

    /// Read a row, optionally backfilling it once when absent.
    pub fn read_only_executor(&self, parent_key: &str, key: &E::Key) -> ReadOnlyContext<E, F> {
        let shard = self.shard_for(parent_key);
        ReadOnlyContext::new(
            shard,
            Arc::clone(&self.factory),
            Arc::clone(&self.executor),
            key.clone(),
        )
    }

    // ========================================================================
    // Scroll
    // ========================================================================

    /// Fetch the next merged page across all live shards. Issues one bounded
    /// query per shard at that shard's pointer offset, merges with the
    /// documented total order (absent key = minimum; ties by shard id then
    /// arrival order), and advances each shard's offset by the rows it
    /// contributed. An empty result ends the scroll.
    pub fn since<K: Ord>(
        &self,
        criteria: &Criteria<E>,
        pointer: ScrollPointer,
        page_size: usize,
        sort_key: impl Fn(&E) -> Option<K> + Send + Sync + 'static,
    ) -> Result<ScrollResult<E>> {
        let mut pointer = pointer;
        let comparator = Arc::new(scroll::key_comparator(sort_key, pointer.direction()));
        let ordered = {
            let comparator = Arc::clone(&comparator);
            criteria.clone().order_by(move |a, b| comparator(a, b))
        };

        let mut tagged: Vec<(u32, usize, E)> = Vec::new();
        for shard in self.router.manager().live_shards() {
            let offset = pointer.offset(shard) as usize;
            let page = ordered.paged(offset, page_size);
            let rows = self
                .executor
                .execute(&*self.factory, true, "scroll", TxnOp::Select { criteria: page }, shard)?
                .entities();
            pointer.advance(shard, rows.len() as u64);
            for (arrival, row) in rows.into_iter().enumerate() {
                tagged.push((shard, arrival, row));
            }
        }

        tagged.sort_by(|(shard_a, idx_a, a), (shard_b, idx_b, b)| {
            comparator(a, b)
                .then(shard_a.cmp(shard_b))
                .then(idx_a.cmp(idx_b))
        });

        Ok(ScrollResult {
            entities: tagged.into_iter().map(|(_, _, e)| e).collect(),
            pointer,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

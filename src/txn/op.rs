//! Transactional Operations - the tagged union behind every DAO call
//!
//! Each variant carries exactly the closures its operation needs; `apply`
//! dispatches exhaustively and runs the database work against the session it
//! is given. An op is single-use: `apply` consumes it, and it must run inside
//! an active transaction scope (the executor guarantees this).
//!
//! A mutator returning `None` is the designed "skip this update" signal, never
//! an error: the stored entity is left untouched and the op reports `false`.

use crate::query::Criteria;
use crate::session::{Entity, Session};
use crate::{Result, ShardError};

/// Rewrites an entity; `None` means "abort the update" (no-op by design).
pub type Mutator<E> = Box<dyn Fn(&E) -> Option<E> + Send>;

/// A dependent operation run with the locked parent inside the same
/// transaction.
pub type ChildOp<E, S> = Box<dyn FnOnce(&mut S, &E) -> Result<()> + Send>;

/// How a lock-and-execute acquires its parent entity.
pub enum Acquire<E: Entity, S: Session> {
    /// Fetch with a lock via a caller-supplied getter (e.g. a
    /// select-for-update query). A missing entity is a logic error.
    Read {
        getter: Box<dyn FnOnce(&mut S) -> Result<Option<E>> + Send>,
    },
    /// Create the parent by saving a new entity.
    Insert { entity: E },
}

/// Operation kind, used for execution contexts and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Save,
    SaveAll,
    Select,
    Count,
    ReadOnly,
    Update,
    UpdateAll,
    GetAndUpdate,
    SelectAndUpdate,
    CreateOrUpdate,
    LockAndExecute,
    UpdateWithScroll,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Save => "save",
            OpKind::SaveAll => "save_all",
            OpKind::Select => "select",
            OpKind::Count => "count",
            OpKind::ReadOnly => "read_only",
            OpKind::Update => "update",
            OpKind::UpdateAll => "update_all",
            OpKind::GetAndUpdate => "get_and_update",
            OpKind::SelectAndUpdate => "select_and_update",
            OpKind::CreateOrUpdate => "create_or_update",
            OpKind::LockAndExecute => "lock_and_execute",
            OpKind::UpdateWithScroll => "update_with_scroll",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an applied operation.
pub enum OpResult<E> {
    Entity(Option<E>),
    Entities(Vec<E>),
    Updated(bool),
    Count(u64),
}

impl<E> OpResult<E> {
    pub fn entity(self) -> Option<E> {
        match self {
            OpResult::Entity(entity) => entity,
            _ => None,
        }
    }

    pub fn entities(self) -> Vec<E> {
        match self {
            OpResult::Entities(entities) => entities,
            _ => Vec::new(),
        }
    }

    pub fn updated(self) -> bool {
        match self {
            OpResult::Updated(updated) => updated,
            _ => false,
        }
    }

    pub fn count(self) -> u64 {
        match self {
            OpResult::Count(count) => count,
            _ => 0,
        }
    }
}

/// A unit of transactional work against one shard.
pub enum TxnOp<E: Entity, S: Session> {
    /// Single insert, no pre-read.
    Save { entity: E },
    /// List of inserts; partial failure aborts the whole transaction.
    SaveAll { entities: Vec<E> },
    /// Plain criteria read.
    Select { criteria: Criteria<E> },
    /// Criteria count, ignoring the window.
    Count { criteria: Criteria<E> },
    /// Fetch by key; on a miss, an optional populator runs once (e.g. a cold
    /// store backfill) followed by exactly one retry fetch.
    ReadOnly {
        key: E::Key,
        populator: Option<Box<dyn FnOnce(&mut S) -> Result<()> + Send>>,
    },
    /// Read the current row under a lock, apply the mutator, persist.
    Update { key: E::Key, mutator: Mutator<E> },
    /// Apply the mutator to every criteria match; rows the mutator skips are
    /// left untouched.
    UpdateAll {
        criteria: Criteria<E>,
        mutator: Mutator<E>,
    },
    /// Lookup-key variant of Update: plain read, then mutate.
    GetAndUpdate { key: E::Key, mutator: Mutator<E> },
    /// Mutate the first row of a criteria result set (ties broken by the
    /// query's declared order).
    SelectAndUpdate {
        criteria: Criteria<E>,
        mutator: Mutator<E>,
    },
    /// Select (optionally locked); save a generated entity when empty,
    /// otherwise mutate the first row only.
    CreateOrUpdate {
        criteria: Criteria<E>,
        mutator: Mutator<E>,
        generator: Box<dyn FnOnce() -> Option<E> + Send>,
        locked: bool,
    },
    /// Acquire or create a parent entity, then run dependent operations in
    /// registration order within the same transaction.
    LockAndExecute {
        acquire: Acquire<E, S>,
        operations: Vec<ChildOp<E, S>>,
    },
    /// Walk a forward-only cursor, mutating row by row while the continuation
    /// predicate holds.
    UpdateWithScroll {
        criteria: Criteria<E>,
        mutator: Mutator<E>,
        update_next: Box<dyn FnMut(u64, &E) -> bool + Send>,
    },
}

impl<E: Entity, S: Session> TxnOp<E, S> {
    pub fn kind(&self) -> OpKind {
        match self {
            TxnOp::Save { .. } => OpKind::Save,
            TxnOp::SaveAll { .. } => OpKind::SaveAll,
            TxnOp::Select { .. } => OpKind::Select,
            TxnOp::Count { .. } => OpKind::Count,
            TxnOp::ReadOnly { .. } => OpKind::ReadOnly,
            TxnOp::Update { .. } => OpKind::Update,
            TxnOp::UpdateAll { .. } => OpKind::UpdateAll,
            TxnOp::GetAndUpdate { .. } => OpKind::GetAndUpdate,
            TxnOp::SelectAndUpdate { .. } => OpKind::SelectAndUpdate,
            TxnOp::CreateOrUpdate { .. } => OpKind::CreateOrUpdate,
            TxnOp::LockAndExecute { .. } => OpKind::LockAndExecute,
            TxnOp::UpdateWithScroll { .. } => OpKind::UpdateWithScroll,
        }
    }

    /// Run the operation. Must be called within an active transaction scope;
    /// side-effecting and not idempotent in general.
    pub fn apply(self, session: &mut S) -> Result<OpResult<E>> {
        match self {
            TxnOp::Save { entity } => {
                let saved = session.insert(entity)?;
                Ok(OpResult::Entity(Some(saved)))
            }

            TxnOp::SaveAll { entities } => {
                let mut saved = Vec::with_capacity(entities.len());
                for entity in entities {
                    saved.push(session.insert(entity)?);
                }
                Ok(OpResult::Entities(saved))
            }

            TxnOp::Select { criteria } => Ok(OpResult::Entities(session.select(&criteria)?)),

            TxnOp::Count { criteria } => Ok(OpResult::Count(session.count(&criteria)?)),

            TxnOp::ReadOnly { key, populator } => match session.get::<E>(&key)? {
                Some(entity) => Ok(OpResult::Entity(Some(entity))),
                None => match populator {
                    Some(populate) => {
                        populate(session)?;
                        // one retry, then give up
                        Ok(OpResult::Entity(session.get::<E>(&key)?))
                    }
                    None => Ok(OpResult::Entity(None)),
                },
            },

            TxnOp::Update { key, mutator } => {
                let Some(current) = session.get_for_update::<E>(&key)? else {
                    return Ok(OpResult::Updated(false));
                };
                Self::mutate_and_store(session, &current, &mutator)
            }

            TxnOp::UpdateAll { criteria, mutator } => {
                let rows = session.select(&criteria)?;
                let mut updated = 0u64;
                for row in rows {
                    if let Some(new) = mutator(&row) {
                        session.update(new)?;
                        updated += 1;
                    }
                }
                Ok(OpResult::Count(updated))
            }

            TxnOp::GetAndUpdate { key, mutator } => {
                let Some(current) = session.get::<E>(&key)? else {
                    return Ok(OpResult::Updated(false));
                };
                Self::mutate_and_store(session, &current, &mutator)
            }

            TxnOp::SelectAndUpdate { criteria, mutator } => {
                let rows = session.select(&criteria)?;
                let Some(first) = rows.into_iter().next() else {
                    return Ok(OpResult::Updated(false));
                };
                Self::mutate_and_store(session, &first, &mutator)
            }

            TxnOp::CreateOrUpdate {
                criteria,
                mutator,
                generator,
                locked,
            } => {
                let rows = if locked {
                    session.select_for_update(&criteria)?
                } else {
                    session.select(&criteria)?
                };
                match rows.into_iter().next() {
                    // only the first row of a multi-row match is updated
                    Some(first) => match mutator(&first) {
                        Some(new) => {
                            session.update(new.clone())?;
                            Ok(OpResult::Entity(Some(new)))
                        }
                        None => Ok(OpResult::Entity(None)),
                    },
                    None => {
                        let entity = generator().ok_or(ShardError::GeneratorReturnedNothing)?;
                        let saved = session.insert(entity)?;
                        Ok(OpResult::Entity(Some(saved)))
                    }
                }
            }

            TxnOp::LockAndExecute {
                acquire,
                operations,
            } => {
                let parent = match acquire {
                    Acquire::Read { getter } => getter(session)?
                        .ok_or_else(|| ShardError::LockTargetMissing(E::name().to_string()))?,
                    Acquire::Insert { entity } => session.insert(entity)?,
                };
                for operation in operations {
                    operation(session, &parent)?;
                }
                Ok(OpResult::Entity(Some(parent)))
            }

            TxnOp::UpdateWithScroll {
                criteria,
                mutator,
                mut update_next,
            } => {
                let mut cursor = session.open_cursor::<E>(&criteria)?;
                let mut updated = 0u64;
                while let Some(row) = session.cursor_next(&mut cursor)? {
                    if let Some(new) = mutator(&row) {
                        session.update(new)?;
                        updated += 1;
                    }
                    if !update_next(updated, &row) {
                        break;
                    }
                }
                Ok(OpResult::Count(updated))
            }
        }
    }

    fn mutate_and_store(session: &mut S, current: &E, mutator: &Mutator<E>) -> Result<OpResult<E>> {
        match mutator(current) {
            Some(new) => {
                session.update(new)?;
                Ok(OpResult::Updated(true))
            }
            None => Ok(OpResult::Updated(false)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryDb, MemorySession, SessionFactory};

    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        id: u64,
        status: &'static str,
    }

    impl Entity for Order {
        type Key = u64;

        fn key(&self) -> u64 {
            self.id
        }

        fn name() -> &'static str {
            "orders"
        }
    }

    fn order(id: u64, status: &'static str) -> Order {
        Order { id, status }
    }

    fn session() -> MemorySession {
        MemoryDb::new(1).open_session(0).unwrap()
    }

    type Op = TxnOp<Order, MemorySession>;

    fn set_status(status: &'static str) -> Mutator<Order> {
        Box::new(move |o: &Order| Some(Order { id: o.id, status }))
    }

    fn skip_update() -> Mutator<Order> {
        Box::new(|_: &Order| None)
    }

    #[test]
    fn test_save_and_select() {
        let mut s = session();
        let saved = (Op::Save { entity: order(1, "new") }).apply(&mut s).unwrap();
        assert_eq!(saved.entity().unwrap().id, 1);

        let rows = (Op::Select { criteria: Criteria::all() }).apply(&mut s).unwrap();
        assert_eq!(rows.entities().len(), 1);

        let count = (Op::Count { criteria: Criteria::all() }).apply(&mut s).unwrap();
        assert_eq!(count.count(), 1);
    }

    #[test]
    fn test_update_missing_row_is_noop() {
        let mut s = session();
        let op = Op::Update { key: 9, mutator: set_status("paid") };
        assert!(!op.apply(&mut s).unwrap().updated());
    }

    #[test]
    fn test_null_mutator_leaves_row_unchanged() {
        let mut s = session();
        s.insert(order(1, "new")).unwrap();

        let op = Op::Update { key: 1, mutator: skip_update() };
        assert!(!op.apply(&mut s).unwrap().updated());
        assert_eq!(s.get::<Order>(&1).unwrap().unwrap().status, "new");
    }

    #[test]
    fn test_mutator_result_is_what_persists() {
        let mut s = session();
        s.insert(order(1, "new")).unwrap();

        let op = Op::Update { key: 1, mutator: set_status("paid") };
        assert!(op.apply(&mut s).unwrap().updated());
        assert_eq!(s.get::<Order>(&1).unwrap().unwrap().status, "paid");
    }

    #[test]
    fn test_get_and_update_by_lookup_key() {
        let mut s = session();
        s.insert(order(7, "new")).unwrap();

        let op = Op::GetAndUpdate { key: 7, mutator: set_status("shipped") };
        assert!(op.apply(&mut s).unwrap().updated());

        let op = Op::GetAndUpdate { key: 8, mutator: set_status("shipped") };
        assert!(!op.apply(&mut s).unwrap().updated());
    }

    #[test]
    fn test_select_and_update_touches_first_row_only() {
        let mut s = session();
        s.insert(order(1, "new")).unwrap();
        s.insert(order(2, "new")).unwrap();

        let op = Op::SelectAndUpdate {
            criteria: Criteria::matching(|o: &Order| o.status == "new")
                .order_by_key(|o| Some(o.id)),
            mutator: set_status("paid"),
        };
        assert!(op.apply(&mut s).unwrap().updated());
        assert_eq!(s.get::<Order>(&1).unwrap().unwrap().status, "paid");
        assert_eq!(s.get::<Order>(&2).unwrap().unwrap().status, "new");
    }

    #[test]
    fn test_update_all_skips_rows_the_mutator_declines() {
        let mut s = session();
        s.insert(order(1, "new")).unwrap();
        s.insert(order(2, "paid")).unwrap();
        s.insert(order(3, "new")).unwrap();

        let op = Op::UpdateAll {
            criteria: Criteria::all(),
            mutator: Box::new(|o: &Order| {
                (o.status == "new").then(|| Order { id: o.id, status: "shipped" })
            }),
        };
        assert_eq!(op.apply(&mut s).unwrap().count(), 2);
        assert_eq!(s.get::<Order>(&2).unwrap().unwrap().status, "paid");
    }

    #[test]
    fn test_create_or_update_creates_when_empty() {
        let mut s = session();
        let op = Op::CreateOrUpdate {
            criteria: Criteria::matching(|o: &Order| o.id == 1),
            mutator: set_status("paid"),
            generator: Box::new(|| Some(order(1, "new"))),
            locked: false,
        };
        let created = op.apply(&mut s).unwrap().entity().unwrap();
        assert_eq!(created.status, "new");
        assert!(s.get::<Order>(&1).unwrap().is_some());
    }

    #[test]
    fn test_create_or_update_updates_first_match() {
        let mut s = session();
        s.insert(order(1, "new")).unwrap();

        let op = Op::CreateOrUpdate {
            criteria: Criteria::matching(|o: &Order| o.id == 1),
            mutator: set_status("paid"),
            generator: Box::new(|| Some(order(1, "never"))),
            locked: true,
        };
        let updated = op.apply(&mut s).unwrap().entity().unwrap();
        assert_eq!(updated.status, "paid");
    }

    #[test]
    fn test_create_or_update_null_generator_is_fatal() {
        let mut s = session();
        let op = Op::CreateOrUpdate {
            criteria: Criteria::matching(|o: &Order| o.id == 1),
            mutator: set_status("paid"),
            generator: Box::new(|| None),
            locked: false,
        };
        assert!(matches!(
            op.apply(&mut s),
            Err(ShardError::GeneratorReturnedNothing)
        ));
    }

    #[test]
    fn test_create_or_update_null_mutator_is_noop() {
        let mut s = session();
        s.insert(order(1, "new")).unwrap();

        let op = Op::CreateOrUpdate {
            criteria: Criteria::matching(|o: &Order| o.id == 1),
            mutator: skip_update(),
            generator: Box::new(|| Some(order(1, "never"))),
            locked: false,
        };
        assert!(op.apply(&mut s).unwrap().entity().is_none());
        assert_eq!(s.get::<Order>(&1).unwrap().unwrap().status, "new");
    }

    #[test]
    fn test_lock_and_execute_missing_parent_is_fatal() {
        let mut s = session();
        let op = Op::LockAndExecute {
            acquire: Acquire::Read {
                getter: Box::new(|s: &mut MemorySession| s.get_for_update::<Order>(&1)),
            },
            operations: Vec::new(),
        };
        assert!(matches!(
            op.apply(&mut s),
            Err(ShardError::LockTargetMissing(_))
        ));
    }

    #[test]
    fn test_lock_and_execute_runs_children_in_order() {
        let mut s = session();
        let op = Op::LockAndExecute {
            acquire: Acquire::Insert { entity: order(1, "new") },
            operations: vec![
                Box::new(|s: &mut MemorySession, parent: &Order| {
                    s.insert(order(parent.id * 10, "child")).map(|_| ())
                }),
                Box::new(|s: &mut MemorySession, parent: &Order| {
                    s.insert(order(parent.id * 100, "child")).map(|_| ())
                }),
            ],
        };
        let parent = op.apply(&mut s).unwrap().entity().unwrap();
        assert_eq!(parent.id, 1);
        assert!(s.get::<Order>(&10).unwrap().is_some());
        assert!(s.get::<Order>(&100).unwrap().is_some());
    }

    #[test]
    fn test_read_only_populator_runs_once_then_retries() {
        let mut s = session();
        let op = Op::ReadOnly {
            key: 1,
            populator: Some(Box::new(|s: &mut MemorySession| {
                s.insert(order(1, "backfilled")).map(|_| ())
            })),
        };
        let fetched = op.apply(&mut s).unwrap().entity().unwrap();
        assert_eq!(fetched.status, "backfilled");

        // populator that fails to produce the row: one retry, then give up
        let op = Op::ReadOnly {
            key: 2,
            populator: Some(Box::new(|_: &mut MemorySession| Ok(()))),
        };
        assert!(op.apply(&mut s).unwrap().entity().is_none());
    }

    #[test]
    fn test_update_with_scroll_stops_when_predicate_declines() {
        let mut s = session();
        for id in 0..10 {
            s.insert(order(id, "new")).unwrap();
        }

        let op = Op::UpdateWithScroll {
            criteria: Criteria::all().order_by_key(|o: &Order| Some(o.id)),
            mutator: set_status("seen"),
            update_next: Box::new(|updated, _| updated < 4),
        };
        assert_eq!(op.apply(&mut s).unwrap().count(), 4);
        assert_eq!(s.get::<Order>(&3).unwrap().unwrap().status, "seen");
        assert_eq!(s.get::<Order>(&4).unwrap().unwrap().status, "new");
    }
}

//! Session layer - the narrow interface to the underlying database framework
//!
//! This layer never talks SQL. Everything it needs from the access framework
//! is captured by two traits:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  SessionFactory                                          │
//! │  - Opens a session bound to one shard's data source      │
//! ├──────────────────────────────────────────────────────────┤
//! │  Session                                                 │
//! │  - begin / commit / rollback                             │
//! │  - typed entity CRUD (get, insert, update)               │
//! │  - bounded, ordered criteria select (+ locked variant)   │
//! │  - forward-only scrollable cursor                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Row/entity locking (`get_for_update`, `select_for_update`) is delegated to
//! the backend; this layer only guarantees that dependent operations run
//! before the lock-holding transaction commits.

pub mod memory;

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;

use crate::query::Criteria;
use crate::Result;

pub use memory::{MemoryDb, MemorySession};

/// A persistable entity with a typed primary key.
pub trait Entity: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    /// Stable entity name used for metrics labels and execution contexts.
    fn name() -> &'static str;
}

/// A session bound to a single shard's data source.
pub trait Session {
    /// Open a transaction. `read_only` may relax isolation in the backend.
    fn begin(&mut self, read_only: bool) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    fn get<E: Entity>(&mut self, key: &E::Key) -> Result<Option<E>>;

    /// Fetch with a row lock held until commit/rollback (backend-delegated).
    fn get_for_update<E: Entity>(&mut self, key: &E::Key) -> Result<Option<E>>;

    /// Persist a new entity. Duplicate keys are a session error.
    fn insert<E: Entity>(&mut self, entity: E) -> Result<E>;

    /// Persist changes to an existing entity.
    fn update<E: Entity>(&mut self, entity: E) -> Result<()>;

    /// Bounded, optionally-ordered selection.
    fn select<E: Entity>(&mut self, criteria: &Criteria<E>) -> Result<Vec<E>>;

    /// Selection with row locks held until commit/rollback (backend-delegated).
    fn select_for_update<E: Entity>(&mut self, criteria: &Criteria<E>) -> Result<Vec<E>>;

    /// Count matching rows, ignoring the criteria's offset/limit window.
    fn count<E: Entity>(&mut self, criteria: &Criteria<E>) -> Result<u64>;

    /// Open a forward-only cursor over the criteria's matches.
    fn open_cursor<E: Entity>(&mut self, criteria: &Criteria<E>) -> Result<ScrollCursor<E>>;

    /// Advance a cursor, fetching the next batch from the backend as needed.
    fn cursor_next<E: Entity>(&mut self, cursor: &mut ScrollCursor<E>) -> Result<Option<E>>;
}

/// Opens sessions bound to individual shards.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    fn open_session(&self, shard: u32) -> Result<Self::Session>;
}

/// Forward-only cursor state. Session implementations drive it by asking for
/// the next page window (`next_page`) and recording what the backend returned
/// (`record_fetch`).
pub struct ScrollCursor<E> {
    criteria: Criteria<E>,
    fetched: usize,
    buffer: VecDeque<E>,
    exhausted: bool,
    batch: usize,
}

const DEFAULT_CURSOR_BATCH: usize = 64;

impl<E> ScrollCursor<E> {
    pub fn new(criteria: Criteria<E>) -> Self {
        Self::with_batch_size(criteria, DEFAULT_CURSOR_BATCH)
    }

    pub fn with_batch_size(criteria: Criteria<E>, batch: usize) -> Self {
        Self {
            criteria,
            fetched: 0,
            buffer: VecDeque::new(),
            exhausted: false,
            batch: batch.max(1),
        }
    }

    /// Criteria window for the next backend fetch.
    pub fn next_page(&self) -> Criteria<E> {
        self.criteria
            .paged(self.criteria.offset() + self.fetched, self.batch)
    }

    /// Record a fetched batch. A short batch marks the cursor exhausted.
    pub fn record_fetch(&mut self, rows: Vec<E>) {
        if rows.len() < self.batch {
            self.exhausted = true;
        }
        self.fetched += rows.len();
        self.buffer.extend(rows);
    }

    pub fn pop(&mut self) -> Option<E> {
        self.buffer.pop_front()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Total rows fetched from the backend so far.
    pub fn fetched(&self) -> usize {
        self.fetched
    }
}

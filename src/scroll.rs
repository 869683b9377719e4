//! Scroll - cross-shard paginated iteration
//!
//! A scroll pointer remembers, per shard, how many rows the caller has already
//! consumed. Each scroll call issues one bounded query per live shard at that
//! shard's offset, merges the pages client-side with a stable total order, and
//! advances each shard's offset by the rows it contributed. The caller loops
//! until a call returns zero rows.
//!
//! Total order: the sort key extractor may return `None`; an absent key is
//! treated as the minimum, so those rows come first ascending and last
//! descending. Ties break by shard id, then arrival order (stable merge).

use std::cmp::Ordering;
use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Scroll direction; also selects where absent sort keys land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Ascending,
    Descending,
}

impl Default for ScrollDirection {
    fn default() -> Self {
        ScrollDirection::Ascending
    }
}

/// Per-shard offset bookkeeping for one scroll session. Caller-owned: it is
/// handed back with every page and never deleted automatically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrollPointer {
    offsets: HashMap<u32, u64>,
    direction: ScrollDirection,
}

impl ScrollPointer {
    pub fn new(direction: ScrollDirection) -> Self {
        Self {
            offsets: HashMap::new(),
            direction,
        }
    }

    pub fn direction(&self) -> ScrollDirection {
        self.direction
    }

    /// Rows already consumed from a shard (0 if never touched).
    pub fn offset(&self, shard: u32) -> u64 {
        self.offsets.get(&shard).copied().unwrap_or(0)
    }

    /// Add `n` to a shard's offset and return the new value.
    pub fn advance(&mut self, shard: u32, n: u64) -> u64 {
        let offset = self.offsets.entry(shard).or_insert(0);
        *offset += n;
        *offset
    }

    /// Total rows consumed across all shards.
    pub fn total_consumed(&self) -> u64 {
        self.offsets.values().sum()
    }
}

/// One merged page plus the pointer to pass to the next call.
pub struct ScrollResult<E> {
    pub entities: Vec<E>,
    pub pointer: ScrollPointer,
}

impl<E> ScrollResult<E> {
    /// A page with no rows ends the scroll.
    pub fn is_final(&self) -> bool {
        self.entities.is_empty()
    }
}

// ============================================================================
// Scroll Point Store
// ============================================================================

/// Pluggable storage for scroll pointers keyed by a caller-chosen session id.
pub trait ScrollPointStore: Send + Sync {
    /// Fetch the pointer for a scroll session, creating it lazily.
    fn get_or_create(&self, scroll_id: &str, direction: ScrollDirection) -> ScrollPointer;

    fn put(&self, scroll_id: &str, pointer: ScrollPointer);

    /// Drop a pointer. Never called automatically; the lifecycle is the
    /// caller's.
    fn remove(&self, scroll_id: &str) -> Option<ScrollPointer>;
}

/// Default in-memory store.
#[derive(Default)]
pub struct InMemoryScrollPointStore {
    points: RwLock<HashMap<String, ScrollPointer>>,
}

impl InMemoryScrollPointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScrollPointStore for InMemoryScrollPointStore {
    fn get_or_create(&self, scroll_id: &str, direction: ScrollDirection) -> ScrollPointer {
        self.points
            .write()
            .entry(scroll_id.to_string())
            .or_insert_with(|| ScrollPointer::new(direction))
            .clone()
    }

    fn put(&self, scroll_id: &str, pointer: ScrollPointer) {
        self.points.write().insert(scroll_id.to_string(), pointer);
    }

    fn remove(&self, scroll_id: &str) -> Option<ScrollPointer> {
        self.points.write().remove(scroll_id)
    }
}

// ============================================================================
// Sort order
// ============================================================================

/// Comparator over an extracted sort key implementing the documented total
/// order: absent key = minimum, reversed wholesale for descending scrolls.
pub fn key_comparator<E, K: Ord>(
    key: impl Fn(&E) -> Option<K> + Send + Sync + 'static,
    direction: ScrollDirection,
) -> impl Fn(&E, &E) -> Ordering + Send + Sync + 'static {
    move |a, b| {
        let ord = match (key(a), key(b)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        };
        match direction {
            ScrollDirection::Ascending => ord,
            ScrollDirection::Descending => ord.reverse(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

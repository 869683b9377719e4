//! Criteria - the query contract between this layer and the session backend
//!
//! A criteria is a shareable predicate plus an optional comparator and an
//! offset/limit window. It is the only query shape the session layer must
//! honor: filter, then sort, then window. The criteria DSL of the underlying
//! framework is out of scope; typed closures replace it at this seam.

use std::cmp::Ordering;
use std::sync::Arc;

/// A bounded, optionally-ordered selection over entities of type `E`.
pub struct Criteria<E> {
    predicate: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    comparator: Option<Arc<dyn Fn(&E, &E) -> Ordering + Send + Sync>>,
    offset: usize,
    limit: Option<usize>,
}

impl<E> Clone for Criteria<E> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
            comparator: self.comparator.as_ref().map(Arc::clone),
            offset: self.offset,
            limit: self.limit,
        }
    }
}

impl<E> Criteria<E> {
    /// Match every row.
    pub fn all() -> Self {
        Self {
            predicate: Arc::new(|_| true),
            comparator: None,
            offset: 0,
            limit: None,
        }
    }

    /// Match rows satisfying the predicate.
    pub fn matching(predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
            comparator: None,
            offset: 0,
            limit: None,
        }
    }

    /// Order results with an explicit comparator.
    pub fn order_by(mut self, comparator: impl Fn(&E, &E) -> Ordering + Send + Sync + 'static) -> Self {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    /// Order results by an extracted key. Rows where the key is absent sort
    /// first (the absent key is the minimum).
    pub fn order_by_key<K: Ord>(
        self,
        key: impl Fn(&E) -> Option<K> + Send + Sync + 'static,
    ) -> Self {
        self.order_by(move |a, b| match (key(a), key(b)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        })
    }

    /// Skip the first `n` matching rows.
    pub fn skip(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    /// Return at most `n` rows.
    pub fn take(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Clone this criteria with a replacement window (used for pagination).
    pub fn paged(&self, offset: usize, limit: usize) -> Self {
        let mut page = self.clone();
        page.offset = offset;
        page.limit = Some(limit);
        page
    }

    pub fn matches(&self, entity: &E) -> bool {
        (self.predicate)(entity)
    }

    /// Compare two rows; `Equal` when no ordering was requested.
    pub fn compare(&self, a: &E, b: &E) -> Ordering {
        match &self.comparator {
            Some(cmp) => cmp(a, b),
            None => Ordering::Equal,
        }
    }

    pub fn has_order(&self) -> bool {
        self.comparator.is_some()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Apply the full contract to an already-gathered row set:
    /// filter, stable sort, then the offset/limit window.
    pub fn apply_to(&self, rows: Vec<E>) -> Vec<E> {
        let mut rows: Vec<E> = rows.into_iter().filter(|e| self.matches(e)).collect();
        if let Some(cmp) = &self.comparator {
            rows.sort_by(|a, b| cmp(a, b));
        }
        let mut iter = rows.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.by_ref().take(limit).collect(),
            None => iter.collect(),
        }
    }
}

//! In-memory session backend
//!
//! Per-shard typed stores (`TypeId` -> key/entity map) behind a `parking_lot`
//! lock, with a buffered-write overlay per session: reads see the session's own
//! uncommitted writes, commit replays the overlay into the base store under one
//! shard lock, rollback drops it. Row locking is satisfied trivially by the
//! shard lock, so `get_for_update`/`select_for_update` degrade to plain reads.
//!
//! Intended for tests and embedded use; not a durable store.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Entity, ScrollCursor, Session, SessionFactory};
use crate::query::Criteria;
use crate::{Result, ShardError};

type StoreMap = HashMap<TypeId, Box<dyn Any + Send + Sync>>;

/// Committed rows for one entity type: key -> (insertion sequence, entity).
/// The sequence preserves arrival order so unordered selects paginate
/// deterministically.
struct BaseStore<E: Entity> {
    rows: HashMap<E::Key, (u64, E)>,
    next_seq: u64,
}

impl<E: Entity> BaseStore<E> {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            next_seq: 0,
        }
    }

    fn upsert(&mut self, key: E::Key, entity: E) {
        match self.rows.get_mut(&key) {
            Some(slot) => slot.1 = entity,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.rows.insert(key, (seq, entity));
            }
        }
    }

    fn entries_in_order(&self) -> Vec<(E::Key, E)> {
        let mut entries: Vec<(&E::Key, &(u64, E))> = self.rows.iter().collect();
        entries.sort_by_key(|(_, (seq, _))| *seq);
        entries
            .into_iter()
            .map(|(key, (_, entity))| (key.clone(), entity.clone()))
            .collect()
    }
}

/// Uncommitted writes for one entity type within a session.
struct Overlay<E: Entity> {
    upserts: HashMap<E::Key, E>,
    /// First-touch order, so new rows land in the base store in write order.
    order: Vec<E::Key>,
}

impl<E: Entity> Overlay<E> {
    fn new() -> Self {
        Self {
            upserts: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn upsert(&mut self, key: E::Key, entity: E) {
        if !self.upserts.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.upserts.insert(key, entity);
    }
}

type ApplyFn = fn(Box<dyn Any + Send>, &mut StoreMap);

/// Monomorphized commit step: replay one entity type's overlay into the base.
fn apply_overlay<E: Entity>(boxed: Box<dyn Any + Send>, stores: &mut StoreMap) {
    let overlay = match boxed.downcast::<Overlay<E>>() {
        Ok(overlay) => *overlay,
        Err(_) => return,
    };
    let entry = stores
        .entry(TypeId::of::<E>())
        .or_insert_with(|| Box::new(BaseStore::<E>::new()));
    let Some(store) = entry.downcast_mut::<BaseStore<E>>() else {
        return;
    };
    let mut upserts = overlay.upserts;
    for key in overlay.order {
        if let Some(entity) = upserts.remove(&key) {
            store.upsert(key, entity);
        }
    }
}

struct OverlayEntry {
    store: Box<dyn Any + Send>,
    apply: ApplyFn,
}

/// In-memory session factory holding one store map per shard.
#[derive(Clone)]
pub struct MemoryDb {
    shards: Vec<Arc<RwLock<StoreMap>>>,
}

impl MemoryDb {
    pub fn new(num_shards: u32) -> Self {
        Self {
            shards: (0..num_shards)
                .map(|_| Arc::new(RwLock::new(StoreMap::new())))
                .collect(),
        }
    }

    pub fn num_shards(&self) -> u32 {
        self.shards.len() as u32
    }

    /// Committed row count for one entity type on one shard.
    pub fn row_count<E: Entity>(&self, shard: u32) -> usize {
        self.shards
            .get(shard as usize)
            .map(|s| {
                s.read()
                    .get(&TypeId::of::<E>())
                    .and_then(|b| b.downcast_ref::<BaseStore<E>>())
                    .map(|store| store.rows.len())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Committed row count for one entity type across all shards.
    pub fn total_rows<E: Entity>(&self) -> usize {
        (0..self.num_shards()).map(|s| self.row_count::<E>(s)).sum()
    }
}

impl SessionFactory for MemoryDb {
    type Session = MemorySession;

    fn open_session(&self, shard: u32) -> Result<MemorySession> {
        let stores = self
            .shards
            .get(shard as usize)
            .ok_or(ShardError::UnknownShard(shard))?;
        Ok(MemorySession {
            shard: Arc::clone(stores),
            in_txn: false,
            read_only: false,
            overlay: HashMap::new(),
        })
    }
}

/// A session bound to one in-memory shard.
pub struct MemorySession {
    shard: Arc<RwLock<StoreMap>>,
    in_txn: bool,
    read_only: bool,
    overlay: HashMap<TypeId, OverlayEntry>,
}

impl MemorySession {
    fn overlay_ref<E: Entity>(&self) -> Option<&Overlay<E>> {
        self.overlay
            .get(&TypeId::of::<E>())
            .and_then(|entry| entry.store.downcast_ref::<Overlay<E>>())
    }

    fn overlay_mut<E: Entity>(&mut self) -> &mut Overlay<E> {
        let entry = self
            .overlay
            .entry(TypeId::of::<E>())
            .or_insert_with(|| OverlayEntry {
                store: Box::new(Overlay::<E>::new()),
                apply: apply_overlay::<E>,
            });
        match entry.store.downcast_mut::<Overlay<E>>() {
            Some(overlay) => overlay,
            // the map is keyed by TypeId, so the stored overlay is always Overlay<E>
            None => unreachable!("overlay store type mismatch"),
        }
    }

    fn base_get<E: Entity>(&self, key: &E::Key) -> Option<E> {
        self.shard
            .read()
            .get(&TypeId::of::<E>())
            .and_then(|b| b.downcast_ref::<BaseStore<E>>())
            .and_then(|store| store.rows.get(key).map(|(_, e)| e.clone()))
    }

    fn base_contains<E: Entity>(&self, key: &E::Key) -> bool {
        self.base_get::<E>(key).is_some()
    }

    /// Base rows in arrival order, with the session's overlay merged in:
    /// overwritten rows keep their position, new rows append in write order.
    fn gather<E: Entity>(&self) -> Vec<E> {
        let base = self
            .shard
            .read()
            .get(&TypeId::of::<E>())
            .and_then(|b| b.downcast_ref::<BaseStore<E>>())
            .map(|store| store.entries_in_order())
            .unwrap_or_default();

        let overlay = if self.in_txn { self.overlay_ref::<E>() } else { None };
        let mut rows = Vec::with_capacity(base.len());
        let mut base_keys: HashSet<E::Key> = HashSet::with_capacity(base.len());
        for (key, entity) in base {
            let row = overlay
                .and_then(|o| o.upserts.get(&key).cloned())
                .unwrap_or(entity);
            base_keys.insert(key);
            rows.push(row);
        }
        if let Some(overlay) = overlay {
            for key in &overlay.order {
                if !base_keys.contains(key) {
                    if let Some(entity) = overlay.upserts.get(key) {
                        rows.push(entity.clone());
                    }
                }
            }
        }
        rows
    }

    fn guard_writable(&self) -> Result<()> {
        if self.in_txn && self.read_only {
            return Err(ShardError::Session(
                "cannot write in a read-only transaction".to_string(),
            ));
        }
        Ok(())
    }
}

impl Session for MemorySession {
    fn begin(&mut self, read_only: bool) -> Result<()> {
        if self.in_txn {
            return Err(ShardError::Session("transaction already open".to_string()));
        }
        self.in_txn = true;
        self.read_only = read_only;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_txn {
            return Err(ShardError::Session("no active transaction".to_string()));
        }
        let mut stores = self.shard.write();
        for (_, entry) in self.overlay.drain() {
            (entry.apply)(entry.store, &mut stores);
        }
        self.in_txn = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_txn {
            return Err(ShardError::Session("no active transaction".to_string()));
        }
        self.overlay.clear();
        self.in_txn = false;
        Ok(())
    }

    fn get<E: Entity>(&mut self, key: &E::Key) -> Result<Option<E>> {
        if self.in_txn {
            if let Some(entity) = self.overlay_ref::<E>().and_then(|o| o.upserts.get(key)) {
                return Ok(Some(entity.clone()));
            }
        }
        Ok(self.base_get::<E>(key))
    }

    fn get_for_update<E: Entity>(&mut self, key: &E::Key) -> Result<Option<E>> {
        self.get::<E>(key)
    }

    fn insert<E: Entity>(&mut self, entity: E) -> Result<E> {
        self.guard_writable()?;
        let key = entity.key();
        let in_overlay = self
            .overlay_ref::<E>()
            .map(|o| o.upserts.contains_key(&key))
            .unwrap_or(false);
        if in_overlay || self.base_contains::<E>(&key) {
            return Err(ShardError::Session(format!(
                "duplicate key {:?} for {}",
                key,
                E::name()
            )));
        }
        if self.in_txn {
            self.overlay_mut::<E>().upsert(key, entity.clone());
        } else {
            let mut stores = self.shard.write();
            let entry = stores
                .entry(TypeId::of::<E>())
                .or_insert_with(|| Box::new(BaseStore::<E>::new()));
            if let Some(store) = entry.downcast_mut::<BaseStore<E>>() {
                store.upsert(key, entity.clone());
            }
        }
        Ok(entity)
    }

    fn update<E: Entity>(&mut self, entity: E) -> Result<()> {
        self.guard_writable()?;
        let key = entity.key();
        let in_overlay = self
            .overlay_ref::<E>()
            .map(|o| o.upserts.contains_key(&key))
            .unwrap_or(false);
        if !in_overlay && !self.base_contains::<E>(&key) {
            return Err(ShardError::Session(format!(
                "update of missing {} row {:?}",
                E::name(),
                key
            )));
        }
        if self.in_txn {
            self.overlay_mut::<E>().upsert(key, entity);
        } else {
            let mut stores = self.shard.write();
            if let Some(store) = stores
                .get_mut(&TypeId::of::<E>())
                .and_then(|b| b.downcast_mut::<BaseStore<E>>())
            {
                store.upsert(key, entity);
            }
        }
        Ok(())
    }

    fn select<E: Entity>(&mut self, criteria: &Criteria<E>) -> Result<Vec<E>> {
        Ok(criteria.apply_to(self.gather::<E>()))
    }

    fn select_for_update<E: Entity>(&mut self, criteria: &Criteria<E>) -> Result<Vec<E>> {
        self.select(criteria)
    }

    fn count<E: Entity>(&mut self, criteria: &Criteria<E>) -> Result<u64> {
        Ok(self
            .gather::<E>()
            .iter()
            .filter(|e| criteria.matches(e))
            .count() as u64)
    }

    fn open_cursor<E: Entity>(&mut self, criteria: &Criteria<E>) -> Result<ScrollCursor<E>> {
        Ok(ScrollCursor::new(criteria.clone()))
    }

    fn cursor_next<E: Entity>(&mut self, cursor: &mut ScrollCursor<E>) -> Result<Option<E>> {
        loop {
            if let Some(entity) = cursor.pop() {
                return Ok(Some(entity));
            }
            if cursor.is_exhausted() {
                return Ok(None);
            }
            let rows = self.select(&cursor.next_page())?;
            cursor.record_fetch(rows);
            if !cursor.has_buffered() && cursor.is_exhausted() {
                return Ok(None);
            }
        }
    }
}

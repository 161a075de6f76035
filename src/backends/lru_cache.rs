//! Bounded LRU cache - in-process L1 tier
//!
//! Capacity-bounded key/value store with least-recently-used eviction. The
//! recency order is an intrusive doubly linked list threaded through slot
//! indices of one `Vec`, with a hash map from key to slot index: O(1) get,
//! insert and evict, no pointer cycles, index-stable slots reused through a
//! free list.
//!
//! Expiry policy lives one level up: `get` returns the entry with its
//! expiry metadata and the multi-layer cache decides whether it is stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::stats::StatsRegistry;

/// Sentinel for "no slot" in the intrusive list
const NIL: usize = usize::MAX;

/// A cached value with its lifecycle timestamps
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub inserted_at: Instant,
    /// `None` means the entry never expires locally
    pub expires_at: Option<Instant>,
    pub last_accessed_at: Instant,
}

impl CacheEntry {
    fn new(value: serde_json::Value, expires_at: Option<Instant>) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            expires_at,
            last_accessed_at: now,
        }
    }

    /// Whether the entry is logically stale at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

struct Slot {
    key: String,
    entry: CacheEntry,
    prev: usize,
    next: usize,
}

struct LruInner {
    map: HashMap<String, usize>,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    /// Most recently used slot index
    head: usize,
    /// Least recently used slot index
    tail: usize,
}

#[allow(clippy::indexing_slicing)] // slot indices come from the map and are maintained as an invariant
impl LruInner {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn slot(&self, index: usize) -> &Slot {
        self.slots[index].as_ref().unwrap_or_else(|| unreachable!("dangling slot index"))
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot {
        self.slots[index].as_mut().unwrap_or_else(|| unreachable!("dangling slot index"))
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let slot = self.slot(index);
            (slot.prev, slot.next)
        };
        if prev == NIL {
            self.head = next;
        } else {
            self.slot_mut(prev).next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slot_mut(next).prev = prev;
        }
    }

    fn push_front(&mut self, index: usize) {
        let old_head = self.head;
        {
            let slot = self.slot_mut(index);
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            self.slot_mut(old_head).prev = index;
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }
    }

    fn touch(&mut self, index: usize) {
        if self.head != index {
            self.unlink(index);
            self.push_front(index);
        }
        self.slot_mut(index).entry.last_accessed_at = Instant::now();
    }

    /// Detach a slot entirely and recycle its storage; returns its key
    fn remove_slot(&mut self, index: usize) -> String {
        self.unlink(index);
        let slot = self.slots[index].take().unwrap_or_else(|| unreachable!("dangling slot index"));
        self.map.remove(&slot.key);
        self.free.push(index);
        slot.key
    }

    fn insert_slot(&mut self, key: String, entry: CacheEntry) {
        let slot = Slot {
            key: key.clone(),
            entry,
            prev: NIL,
            next: NIL,
        };
        let index = match self.free.pop() {
            Some(reused) => {
                self.slots[reused] = Some(slot);
                reused
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, index);
        self.push_front(index);
    }
}

/// In-process L1 cache with deterministic LRU eviction
///
/// Size never exceeds the configured capacity; inserting a new key at
/// capacity evicts the least-recently-accessed entry first. All operations
/// take one short `parking_lot` critical section and never block on I/O.
pub struct BoundedLruCache {
    inner: Mutex<LruInner>,
    capacity: usize,
    registry: Arc<StatsRegistry>,
    // Backend-local counters, distinct from the registry's policy-level ones
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BoundedLruCache {
    /// Create a cache holding at most `capacity` entries
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, registry: Arc<StatsRegistry>) -> Self {
        assert!(capacity > 0, "L1 capacity must be at least 1");
        debug!(capacity, "Initializing bounded LRU cache (L1)");
        Self {
            inner: Mutex::new(LruInner::with_capacity(capacity)),
            capacity,
            registry,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a key, refreshing its recency on hit
    ///
    /// Returns the entry including its expiry metadata; expiry itself is not
    /// checked here (the multi-layer cache owns TTL policy).
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        match inner.map.get(key).copied() {
            Some(index) => {
                inner.touch(index);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(inner.slot(index).entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a value
    ///
    /// Replacing an existing key updates the value and expiry in place and
    /// refreshes recency; it never grows the cache. Inserting a new key at
    /// capacity evicts the least-recently-used entry first.
    pub fn set(&self, key: &str, value: serde_json::Value, expires_at: Option<Instant>) {
        let mut inner = self.inner.lock();
        if let Some(index) = inner.map.get(key).copied() {
            inner.touch(index);
            let slot = inner.slot_mut(index);
            slot.entry = CacheEntry::new(value, expires_at);
            return;
        }

        if inner.map.len() >= self.capacity {
            let victim = inner.tail;
            let evicted_key = inner.remove_slot(victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.registry.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %evicted_key, "L1 evicted least-recently-used entry");
        }
        inner.insert_slot(key.to_string(), CacheEntry::new(value, expires_at));
    }

    /// Remove a single key; returns whether it was resident
    pub fn evict(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.map.get(key).copied() {
            Some(index) => {
                inner.remove_slot(index);
                true
            }
            None => false,
        }
    }

    /// Drop every entry, keeping the allocated slot storage
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.slots.clear();
        inner.free.clear();
        inner.head = NIL;
        inner.tail = NIL;
    }

    /// Remove every entry whose expiry has passed; returns how many
    ///
    /// Offered for callers that want proactive sweeping; nothing in the core
    /// schedules it, since expiry is otherwise handled lazily on reads.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let stale: Vec<usize> = inner
            .map
            .values()
            .copied()
            .filter(|&index| inner.slot(index).entry.is_expired_at(now))
            .collect();
        let count = stale.len();
        for index in stale {
            inner.remove_slot(index);
        }
        if count > 0 {
            self.registry
                .expirations
                .fetch_add(count as u64, Ordering::Relaxed);
            debug!(count, "L1 purged expired entries");
        }
        count
    }

    /// Current number of resident entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw lookup hits, before the TTL policy one level up reclassifies
    /// expired entries as misses
    #[must_use]
    pub fn raw_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Raw lookup misses
    #[must_use]
    pub fn raw_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Capacity evictions performed by this instance
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

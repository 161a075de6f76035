//! Multi-layer cache - unified L1/L2 operations
//!
//! Orchestrates the in-process LRU (L1) and the distributed tier (L2):
//! L1 fast path, L2 fallback with promotion into L1, write-through sets,
//! and graceful degradation to L1-only service when the distributed tier
//! is unreachable.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backends::BoundedLruCache;
use crate::stats::{CacheStats, StatsRegistry};
use crate::traits::L2CacheBackend;

/// RAII cleanup guard for in-flight request tracking
///
/// Ensures the per-key entry is removed from the map even on early return
/// or panic.
struct CleanupGuard<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Multi-layer cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries resident in L1
    pub l1_capacity: usize,
    /// TTL applied when `set` is called without an explicit one; also the
    /// L1 expiry used when promoting an L2 entry whose TTL is unknown
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1000,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

/// Unified cache over the L1 and L2 tiers
///
/// All methods are safe under concurrent access. The L1 lock is internal to
/// [`BoundedLruCache`] and is never held across the L2 round trip; misses on
/// the same key are coalesced through a per-key in-flight mutex so a burst
/// of identical lookups costs one L2 round trip.
pub struct MultiLayerCache {
    l1: BoundedLruCache,
    l2: Arc<dyn L2CacheBackend>,
    config: CacheConfig,
    registry: Arc<StatsRegistry>,
    /// In-flight L2 lookups, keyed by cache key
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl MultiLayerCache {
    /// Create the cache over an L2 backend
    pub fn new(
        l2: Arc<dyn L2CacheBackend>,
        config: CacheConfig,
        registry: Arc<StatsRegistry>,
    ) -> Self {
        info!(
            l1_capacity = config.l1_capacity,
            default_ttl_secs = config.default_ttl.as_secs(),
            l2_backend = l2.name(),
            "Initializing multi-layer cache"
        );
        Self {
            l1: BoundedLruCache::new(config.l1_capacity, Arc::clone(&registry)),
            l2,
            config,
            registry,
            in_flight: DashMap::new(),
        }
    }

    /// L1 lookup honoring the expiry policy: stale entries are evicted and
    /// reported as expirations, then treated as misses
    fn l1_live_value(&self, key: &str) -> Option<serde_json::Value> {
        let entry = self.l1.get(key)?;
        if entry.is_expired_at(Instant::now()) {
            self.l1.evict(key);
            self.registry.expirations.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(entry.value)
    }

    /// Get a value (L1 first, then L2 with promotion)
    ///
    /// Returns `None` on a double miss - computing the value is the
    /// caller's responsibility. L2 unavailability is absorbed: the lookup
    /// degrades to L1-only and is reported as a miss, never as an error.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.registry.requests_total.fetch_add(1, Ordering::Relaxed);

        // Fast path: L1, no cross-task coordination needed
        if let Some(value) = self.l1_live_value(key) {
            self.registry.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        // L1 miss: coalesce concurrent lookups of the same key so only one
        // task pays the L2 round trip
        let lock = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        let _cleanup = CleanupGuard {
            map: &self.in_flight,
            key: key.to_string(),
        };

        // Another task may have promoted the key while we waited
        if let Some(value) = self.l1_live_value(key) {
            self.registry.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        match self.l2.get_with_ttl(key).await {
            Ok(Some((value, remaining_ttl))) => {
                self.registry.l2_hits.fetch_add(1, Ordering::Relaxed);
                self.registry.set_cache_degraded(false);

                // Promote with the remaining L2 lifetime so both layers
                // agree on staleness from here on
                let expires_at = remaining_ttl.map(|ttl| Instant::now() + ttl);
                self.l1.set(key, value.clone(), expires_at);
                self.registry.promotions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Promoted entry from L2 to L1");

                Some(value)
            }
            Ok(None) => {
                self.registry.set_cache_degraded(false);
                self.registry.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(error) => {
                // Degrade to L1-only; the caller just sees a miss
                self.registry.l2_errors.fetch_add(1, Ordering::Relaxed);
                if !self.registry.cache_degraded() {
                    warn!(l2_backend = self.l2.name(), %error, "L2 unavailable, serving from L1 only");
                }
                self.registry.set_cache_degraded(true);
                self.registry.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write-through set: L1 first (local readers see it immediately),
    /// then L2
    ///
    /// An L2 write failure leaves the valid local copy in place and flips
    /// the degraded flag; it is never surfaced as an error.
    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        self.l1.set(key, value.clone(), Some(Instant::now() + ttl));

        match self.l2.set_with_ttl(key, &value, ttl).await {
            Ok(()) => {
                self.registry.set_cache_degraded(false);
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached in L1+L2");
            }
            Err(error) => {
                self.registry
                    .l2_write_failures
                    .fetch_add(1, Ordering::Relaxed);
                self.registry.set_cache_degraded(true);
                warn!(key = %key, %error, "L2 write failed, entry cached in L1 only");
            }
        }
    }

    /// Remove a key from both layers (invalidation flow)
    ///
    /// L2 unavailability is tolerated; the L1 copy is gone either way.
    pub async fn remove(&self, key: &str) {
        self.l1.evict(key);
        if let Err(error) = self.l2.remove(key).await {
            self.registry.l2_errors.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, %error, "L2 remove failed");
        }
    }

    /// Drop every entry from both layers
    pub async fn clear(&self) {
        self.l1.clear();
        if let Err(error) = self.l2.clear().await {
            self.registry.l2_errors.fetch_add(1, Ordering::Relaxed);
            warn!(%error, "L2 clear failed");
        }
    }

    /// Remove expired L1 entries eagerly; see
    /// [`BoundedLruCache::purge_expired`]
    pub fn purge_expired(&self) -> usize {
        self.l1.purge_expired()
    }

    /// Per-layer hit counts, sizes and the overall hit rate
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.registry
            .cache_stats(self.l1.len() as u64, self.l1.capacity() as u64)
    }

    /// Whether both tiers respond; L2 failure alone reports `false` but the
    /// cache keeps serving (degraded)
    pub async fn health_check(&self) -> bool {
        self.l2.health_check().await
    }

    /// Number of L2 lookups currently in flight
    #[must_use]
    pub fn in_flight_lookups(&self) -> usize {
        self.in_flight.len()
    }
}

//! Shared statistics registry and the performance summary
//!
//! One [`StatsRegistry`] instance is constructed per process and an `Arc` of
//! it is injected into every component. Components update plain atomic
//! counters; nothing shares mutable structures across component boundaries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Thread-safe counters and flags shared by all performance-core components
///
/// All counters use relaxed ordering: they are monotonic event counts read
/// only for reporting, never for synchronization.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    // Cache
    pub(crate) requests_total: AtomicU64,
    pub(crate) l1_hits: AtomicU64,
    pub(crate) l2_hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) promotions: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) expirations: AtomicU64,
    pub(crate) l2_errors: AtomicU64,
    pub(crate) l2_write_failures: AtomicU64,
    pub(crate) cache_degraded: AtomicBool,

    // Pool
    pub(crate) connections_created: AtomicU64,
    pub(crate) connections_recycled: AtomicU64,
    pub(crate) connections_discarded: AtomicU64,
    pub(crate) health_check_failures: AtomicU64,
    pub(crate) acquire_timeouts: AtomicU64,
    pub(crate) double_releases: AtomicU64,
    pub(crate) pool_degraded: AtomicBool,

    // Batch
    pub(crate) records_enqueued: AtomicU64,
    pub(crate) records_flushed: AtomicU64,
    pub(crate) bulk_flushes: AtomicU64,
    pub(crate) bulk_flush_failures: AtomicU64,
    pub(crate) fallback_writes: AtomicU64,
    pub(crate) write_failures: AtomicU64,
    pub(crate) records_dropped: AtomicU64,
}

impl StatsRegistry {
    /// Create a fresh registry with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the distributed cache tier is currently unreachable
    #[must_use]
    pub fn cache_degraded(&self) -> bool {
        self.cache_degraded.load(Ordering::Relaxed)
    }

    /// Whether the pool has seen repeated connection failures
    #[must_use]
    pub fn pool_degraded(&self) -> bool {
        self.pool_degraded.load(Ordering::Relaxed)
    }

    pub(crate) fn set_cache_degraded(&self, degraded: bool) {
        self.cache_degraded.store(degraded, Ordering::Relaxed);
    }

    pub(crate) fn set_pool_degraded(&self, degraded: bool) {
        self.pool_degraded.store(degraded, Ordering::Relaxed);
    }
}

/// Cache-layer statistics snapshot
///
/// Field names follow counter/gauge conventions so the snapshot can be fed
/// to a metrics collector as-is.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub requests_total: u64,
    pub l1_hits_total: u64,
    pub l2_hits_total: u64,
    pub misses_total: u64,
    pub promotions_total: u64,
    pub evictions_total: u64,
    pub expirations_total: u64,
    pub l2_errors_total: u64,
    pub l2_write_failures_total: u64,
    /// Current number of resident L1 entries
    pub l1_size: u64,
    /// Configured L1 capacity
    pub l1_max_size: u64,
    /// `l1_hits / requests`
    pub l1_hit_rate: f64,
    /// `l2_hits / requests`
    pub l2_hit_rate: f64,
    /// `(l1_hits + l2_hits) / requests`
    pub cache_hit_rate: f64,
    /// True while the distributed tier is unreachable and the cache is
    /// serving from L1 only
    pub degraded: bool,
}

/// Connection-pool statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Live connections (idle + checked out)
    pub db_connections_open: u64,
    /// Idle connections ready to hand out
    pub db_connections_idle: u64,
    /// Connections currently owned by callers
    pub db_connections_checked_out: u64,
    /// Live connections beyond the core size
    pub db_connections_overflow: u64,
    pub connections_created_total: u64,
    pub connections_recycled_total: u64,
    pub connections_discarded_total: u64,
    pub health_check_failures_total: u64,
    pub acquire_timeouts_total: u64,
    pub double_releases_total: u64,
    /// Checked-out over core size, as a percentage. Overflow pushes this
    /// above 100, which is the burst signal it exists to give.
    pub utilization_percent: f64,
    pub degraded: bool,
}

/// Batch-processor statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    /// Records waiting in the active buffer
    pub records_pending: u64,
    pub records_enqueued_total: u64,
    pub records_flushed_total: u64,
    pub bulk_flushes_total: u64,
    pub bulk_flush_failures_total: u64,
    pub fallback_writes_total: u64,
    pub write_failures_total: u64,
    pub records_dropped_total: u64,
    /// Configured size threshold that triggers an automatic flush
    pub size_threshold: u64,
}

/// Aggregated view across all components, for operational dashboards
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub cache: CacheStats,
    pub pool: PoolStats,
    pub batch: BatchStats,
    /// Number of components currently operating without degradation
    pub active_optimizations: u32,
    /// Total number of components
    pub total_optimizations: u32,
}

impl PerformanceSummary {
    pub(crate) fn new(cache: CacheStats, pool: PoolStats, batch: BatchStats) -> Self {
        let mut active = 1; // the batch processor has no degraded state of its own
        if !cache.degraded {
            active += 1;
        }
        if !pool.degraded {
            active += 1;
        }
        Self {
            cache,
            pool,
            batch,
            active_optimizations: active,
            total_optimizations: 3,
        }
    }
}

impl StatsRegistry {
    /// Build the cache snapshot; the live L1 size and capacity come from the
    /// cache itself since gauges are not kept in the registry
    pub(crate) fn cache_stats(&self, l1_size: u64, l1_max_size: u64) -> CacheStats {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let rate = |hits: u64| {
            if requests > 0 {
                hits as f64 / requests as f64
            } else {
                0.0
            }
        };

        CacheStats {
            requests_total: requests,
            l1_hits_total: l1_hits,
            l2_hits_total: l2_hits,
            misses_total: self.misses.load(Ordering::Relaxed),
            promotions_total: self.promotions.load(Ordering::Relaxed),
            evictions_total: self.evictions.load(Ordering::Relaxed),
            expirations_total: self.expirations.load(Ordering::Relaxed),
            l2_errors_total: self.l2_errors.load(Ordering::Relaxed),
            l2_write_failures_total: self.l2_write_failures.load(Ordering::Relaxed),
            l1_size,
            l1_max_size,
            l1_hit_rate: rate(l1_hits),
            l2_hit_rate: rate(l2_hits),
            cache_hit_rate: rate(l1_hits + l2_hits),
            degraded: self.cache_degraded(),
        }
    }
}

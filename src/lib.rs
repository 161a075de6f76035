//! Performance core for a real-time URL-classification service
//!
//! The pieces that keep per-request latency low and the backing stores
//! standing under bursty traffic:
//! - **Multi-layer cache**: in-process bounded LRU (L1) over a distributed
//!   tier (L2, Redis by default), with L2-to-L1 promotion and graceful
//!   degradation to L1-only service
//! - **Connection pool**: bounded core + overflow connections to the
//!   relational store, with pre-use health checks and lifetime recycling
//! - **Batch processor**: size- and time-triggered bulk writes of scan and
//!   feedback records, with per-record fallback on bulk rejection
//! - **Statistics registry**: shared atomic counters feeding one
//!   performance summary
//!
//! The classifier, request router and persistence schema stay outside; the
//! relational store is reached only through a caller-supplied connector.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use urlscan_core::{CoreBuilder, RecordPayload};
//!
//! # async fn example(connector: std::sync::Arc<dyn urlscan_core::DbConnector>,
//! #                  scan: urlscan_core::ScanRecord) -> anyhow::Result<()> {
//! let core = CoreBuilder::new()
//!     .with_connector(connector)
//!     .build()
//!     .await?;
//!
//! // Request path: check the cache, classify on miss, record the scan
//! if core.cache_get("fp:3a7bd3").await.is_none() {
//!     let verdict = serde_json::json!({"is_phishing": false, "confidence": 0.93});
//!     core.cache_set("fp:3a7bd3", verdict, None).await;
//!     core.batch_add(RecordPayload::Scan(scan)).await?;
//! }
//!
//! let summary = core.performance_summary();
//! tracing::info!(hit_rate = summary.cache.cache_hit_rate, "cache performance");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Request -> L1 (LRU) -> L2 (Redis) -> classify()
//!            | hit       | hit         | miss
//!            return      promote to L1 cache_set + batch_add
//!
//! batch_add -> buffer --(size or timer)--> bulk insert via pool
//!                                          | rejected
//!                                          per-record fallback
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

pub mod backends;
pub mod batch;
pub mod builder;
pub mod cache_manager;
pub mod error;
pub mod pool;
pub mod record;
pub mod stats;
pub mod traits;

pub use backends::{BoundedLruCache, CacheEntry, MemoryCache};

#[cfg(feature = "redis")]
pub use backends::RedisCache;

pub use batch::{BatchConfig, BatchProcessor, FlushFailure, FlushReport};
pub use builder::CoreBuilder;
pub use cache_manager::{CacheConfig, MultiLayerCache};
pub use error::{BatchError, PoolError};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use record::{
    BatchRecord, FeedbackRecord, FeedbackType, RecordPayload, ScanRecord, ThreatLevel, Verdict,
};
pub use stats::{BatchStats, CacheStats, PerformanceSummary, PoolStats, StatsRegistry};
pub use traits::{DbConnection, DbConnector, L2CacheBackend, SqlValue};

// Re-export async_trait for backend and connector implementors
pub use async_trait::async_trait;

/// The assembled performance core
///
/// Built once at process start via [`CoreBuilder`], passed to request
/// handlers explicitly, and torn down with [`shutdown`](Self::shutdown).
/// The facade methods mirror the surface consumed by the request router and
/// the operational endpoints; the underlying components are also reachable
/// directly for anything richer.
///
/// Cloning is shallow; all clones share the same components.
#[derive(Clone)]
pub struct PerformanceCore {
    pub(crate) cache: Arc<MultiLayerCache>,
    pub(crate) pool: ConnectionPool,
    pub(crate) batch: Arc<BatchProcessor>,
    pub(crate) registry: Arc<StatsRegistry>,
}

impl std::fmt::Debug for PerformanceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceCore").finish_non_exhaustive()
    }
}

impl PerformanceCore {
    /// The multi-layer cache
    #[must_use]
    pub fn cache(&self) -> &Arc<MultiLayerCache> {
        &self.cache
    }

    /// The database connection pool
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The batching write buffer
    #[must_use]
    pub fn batch(&self) -> &Arc<BatchProcessor> {
        &self.batch
    }

    /// The shared statistics registry
    #[must_use]
    pub fn registry(&self) -> &Arc<StatsRegistry> {
        &self.registry
    }

    /// Cache lookup by URL fingerprint; `None` means the caller classifies
    pub async fn cache_get(&self, key: &str) -> Option<serde_json::Value> {
        self.cache.get(key).await
    }

    /// Write-through cache set; `None` TTL applies the configured default
    pub async fn cache_set(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        self.cache.set(key, value, ttl).await;
    }

    /// Per-layer cache statistics
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Check out a database connection for ad-hoc queries
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::acquire`].
    pub async fn pool_acquire(&self) -> Result<PooledConnection, PoolError> {
        self.pool.acquire().await
    }

    /// Return a checked-out connection
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::release`].
    pub fn pool_release(&self, conn: PooledConnection) -> Result<(), PoolError> {
        self.pool.release(conn)
    }

    /// Pool gauges and counters
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Queue a scan or feedback record for bulk persistence
    ///
    /// # Errors
    ///
    /// See [`BatchProcessor::add`].
    pub async fn batch_add(&self, payload: RecordPayload) -> Result<(), error::BatchError> {
        self.batch.add(payload).await
    }

    /// Flush all pending records now
    ///
    /// # Errors
    ///
    /// See [`BatchProcessor::flush`].
    pub async fn batch_flush(&self) -> Result<FlushReport, error::BatchError> {
        self.batch.flush().await
    }

    /// Batch buffer gauges and counters
    #[must_use]
    pub fn batch_stats(&self) -> BatchStats {
        self.batch.stats()
    }

    /// Aggregated statistics across cache, pool and batch processor
    #[must_use]
    pub fn performance_summary(&self) -> PerformanceSummary {
        PerformanceSummary::new(self.cache_stats(), self.pool_stats(), self.batch_stats())
    }

    /// Whether every component is fully operational
    ///
    /// Degraded components keep serving (L1-only cache, struggling pool);
    /// this reports the partial failure without interrupting them.
    pub async fn health_check(&self) -> bool {
        let l2_ok = self.cache.health_check().await;
        let pool_ok = !self.registry.pool_degraded();

        if l2_ok && pool_ok {
            info!("Performance core health check passed");
            true
        } else {
            warn!(l2_ok, pool_ok, "Performance core health check: partial failure");
            false
        }
    }

    /// Orderly teardown: final batch flush, then close the pool
    pub async fn shutdown(&self) {
        info!("Shutting down performance core");
        self.batch.shutdown().await;
        self.pool.close();
    }
}

//! Performance core builder
//!
//! Explicit construction for the whole performance core: every component is
//! built here, wired to one shared statistics registry, and handed to the
//! embedding service as plain instances - there is no ambient global state.
//!
//! # Example
//!
//! ```rust,ignore
//! use urlscan_core::CoreBuilder;
//!
//! let core = CoreBuilder::new()
//!     .with_connector(my_connector)   // required: the relational store
//!     .with_l1_capacity(2000)
//!     .build()
//!     .await?;
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::PerformanceCore;
use crate::batch::{BatchConfig, BatchProcessor};
use crate::cache_manager::{CacheConfig, MultiLayerCache};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::stats::StatsRegistry;
use crate::traits::{DbConnector, L2CacheBackend};

/// Builder for [`PerformanceCore`]
///
/// Defaults: L1 capacity 1000 with a 3600 s TTL, pool of 20 core + 40
/// overflow connections, batch threshold 100 with a 30 s flush timer. The
/// distributed tier defaults to Redis (`REDIS_URL`, feature `redis`) or the
/// in-process [`MemoryCache`](crate::backends::MemoryCache) without it. The
/// database connector has no default: the relational store belongs to the
/// embedding service.
#[derive(Default)]
pub struct CoreBuilder {
    cache_config: CacheConfig,
    pool_config: PoolConfig,
    batch_config: BatchConfig,
    l2_backend: Option<Arc<dyn L2CacheBackend>>,
    connector: Option<Arc<dyn DbConnector>>,
}

impl CoreBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum entries resident in the in-process L1 tier
    #[must_use]
    pub fn with_l1_capacity(mut self, capacity: usize) -> Self {
        self.cache_config.l1_capacity = capacity;
        self
    }

    /// Full cache configuration (capacity and default TTL)
    #[must_use]
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Custom distributed (L2) tier backend
    #[must_use]
    pub fn with_l2(mut self, backend: Arc<dyn L2CacheBackend>) -> Self {
        self.l2_backend = Some(backend);
        self
    }

    /// Connector for the relational store (required)
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn DbConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Connection pool sizing and timeouts
    #[must_use]
    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Batch thresholds and flush timer period
    #[must_use]
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.batch_config = config;
        self
    }

    /// Build the core and start its background flush timer
    ///
    /// # Errors
    ///
    /// Fails when no connector was provided, or when the default Redis
    /// backend is selected and unreachable.
    pub async fn build(self) -> Result<PerformanceCore> {
        info!("Building performance core");

        let Some(connector) = self.connector else {
            anyhow::bail!(
                "a database connector is required: the relational store is external, \
                 supply one with CoreBuilder::with_connector"
            );
        };

        let l2 = match self.l2_backend {
            Some(backend) => {
                info!(l2_backend = backend.name(), "Using custom L2 backend");
                backend
            }
            None => Self::default_l2().await?,
        };

        let registry = Arc::new(StatsRegistry::new());
        let cache = Arc::new(MultiLayerCache::new(
            l2,
            self.cache_config,
            Arc::clone(&registry),
        ));
        let pool = ConnectionPool::new(connector, self.pool_config, Arc::clone(&registry));
        let batch = Arc::new(BatchProcessor::new(
            pool.clone(),
            self.batch_config,
            Arc::clone(&registry),
        ));

        info!("Performance core built");

        Ok(PerformanceCore {
            cache,
            pool,
            batch,
            registry,
        })
    }

    #[cfg(feature = "redis")]
    async fn default_l2() -> Result<Arc<dyn L2CacheBackend>> {
        let backend = crate::backends::RedisCache::new().await?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "redis"))]
    async fn default_l2() -> Result<Arc<dyn L2CacheBackend>> {
        info!("Redis feature disabled, using the in-process memory backend as L2");
        Ok(Arc::new(crate::backends::MemoryCache::new()))
    }
}

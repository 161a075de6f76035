//! Cache-tier backend implementations
//!
//! # Available backends
//!
//! ## In-process (L1 tier)
//! - [`BoundedLruCache`] - deterministic LRU with an index-linked recency
//!   list (the L1 tier; always available)
//!
//! ## Distributed (L2 tier)
//! - [`RedisCache`] - Redis with automatic reconnection (default L2,
//!   feature: `redis`)
//! - [`MemoryCache`] - in-process stand-in honoring the same contract, for
//!   tests and redis-less deployments

pub mod lru_cache;
pub mod memory_cache;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use lru_cache::{BoundedLruCache, CacheEntry};
pub use memory_cache::MemoryCache;

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

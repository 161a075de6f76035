//! In-process memory backend for the distributed-tier contract
//!
//! A `DashMap`-based implementation of [`L2CacheBackend`] with per-entry
//! expiry and remaining-TTL introspection. It backs deployments that run
//! without a distributed store and the integration test suite; unlike the
//! L1 tier it applies no eviction policy, only TTL expiry.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::traits::L2CacheBackend;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// Concurrent in-process map satisfying the L2 contract
#[derive(Debug, Default)]
pub struct MemoryCache {
    map: DashMap<String, StoredEntry>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        debug!("Initializing in-process memory backend (L2 contract)");
        Self {
            map: DashMap::new(),
        }
    }

    /// Current number of stored entries, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Expired entries are removed lazily on read; this drops them eagerly
    pub fn cleanup_expired(&self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired());
        before - self.map.len()
    }

    fn live_entry(&self, key: &str) -> Option<StoredEntry> {
        // clone out and drop the shard guard before any same-key removal
        let entry = self.map.get(key).map(|guard| guard.value().clone())?;
        if entry.is_expired() {
            self.map.remove(key);
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl L2CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.live_entry(key).map(|entry| entry.value))
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(serde_json::Value, Option<Duration>)>> {
        Ok(self
            .live_entry(key)
            .map(|entry| (entry.value.clone(), entry.remaining_ttl())))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        self.map.insert(
            key.to_string(),
            StoredEntry {
                value: value.clone(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_entries_vanish_on_read() {
        let cache = MemoryCache::new();
        let value = serde_json::json!({"is_phishing": false});
        cache
            .set_with_ttl("k", &value, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(value));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_ttl_shrinks_with_time() {
        let cache = MemoryCache::new();
        cache
            .set_with_ttl("k", &serde_json::json!(1), Duration::from_secs(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(40)).await;
        let (_, ttl) = cache.get_with_ttl("k").await.unwrap().unwrap();
        assert_eq!(ttl, Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_drops_only_expired() {
        let cache = MemoryCache::new();
        cache
            .set_with_ttl("old", &serde_json::json!(1), Duration::from_secs(1))
            .await
            .unwrap();
        cache
            .set_with_ttl("new", &serde_json::json!(2), Duration::from_secs(600))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}

//! Redis backend - default distributed (L2) tier
//!
//! Uses `ConnectionManager` for automatic reconnection and namespaces every
//! key under a configurable prefix so `clear` can sweep exactly the keys
//! this service owns. All failures surface as `Err`, which the multi-layer
//! cache absorbs as degraded mode.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::traits::L2CacheBackend;

/// Default key namespace, matching the service's historical layout
const DEFAULT_PREFIX: &str = "cache:";

/// Redis distributed cache with automatic reconnection
pub struct RedisCache {
    conn_manager: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    /// Connect using the `REDIS_URL` environment variable
    /// (default `redis://127.0.0.1:6379`)
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the initial
    /// `PING` fails.
    pub async fn new() -> Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::with_url(&redis_url).await
    }

    /// Connect to a specific Redis URL
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the initial
    /// `PING` fails.
    pub async fn with_url(redis_url: &str) -> Result<Self> {
        Self::with_url_and_prefix(redis_url, DEFAULT_PREFIX).await
    }

    /// Connect with a custom key namespace
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the initial
    /// `PING` fails.
    pub async fn with_url_and_prefix(redis_url: &str, key_prefix: &str) -> Result<Self> {
        info!(redis_url = %redis_url, "Initializing Redis cache (ConnectionManager)");

        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        let conn_manager = ConnectionManager::new(client)
            .await
            .context("Failed to establish Redis connection manager")?;

        // Fail fast on an unreachable server
        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING health check failed")?;

        info!(redis_url = %redis_url, "Redis cache connected");

        Ok(Self {
            conn_manager,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Collect keys in this backend's namespace via cursor-based SCAN
    /// (safe for production, unlike KEYS)
    async fn scan_namespace(&self) -> Result<Vec<String>> {
        let mut conn = self.conn_manager.clone();
        let pattern = format!("{}*", self.key_prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .context("Redis SCAN failed")?;

            cursor = next;
            keys.extend(batch);

            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl L2CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn
            .get(self.full_key(key))
            .await
            .context("Redis GET failed")?;

        match raw {
            // An undecodable payload is treated as a miss, not an outage
            Some(json) => Ok(serde_json::from_str(&json).ok()),
            None => Ok(None),
        }
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(serde_json::Value, Option<Duration>)>> {
        let full_key = self.full_key(key);
        let mut conn = self.conn_manager.clone();

        let raw: Option<String> = conn.get(&full_key).await.context("Redis GET failed")?;
        let Some(json) = raw else {
            return Ok(None);
        };
        let Some(value) = serde_json::from_str::<serde_json::Value>(&json).ok() else {
            return Ok(None);
        };

        // TTL returns seconds, -1 = no expiry, -2 = key vanished meanwhile
        let ttl_secs: i64 = redis::cmd("TTL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .context("Redis TTL failed")?;

        let ttl = u64::try_from(ttl_secs).ok().map(Duration::from_secs);
        Ok(Some((value, ttl)))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .set_ex(self.full_key(key), json, ttl.as_secs())
            .await
            .context("Redis SETEX failed")?;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached in Redis");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(self.full_key(key))
            .await
            .context("Redis DEL failed")?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let keys = self.scan_namespace().await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        let removed: usize = conn.del(&keys).await.context("Redis bulk DEL failed")?;
        info!(removed, "Cleared Redis cache namespace");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn_manager.clone();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }

    fn name(&self) -> &'static str {
        "Redis (L2)"
    }
}

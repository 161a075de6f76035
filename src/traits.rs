//! Trait seams toward the external collaborators
//!
//! Two external systems are consumed only through traits defined here:
//!
//! - `L2CacheBackend`: the distributed cache tier (Redis by default).
//! - `DbConnector` / `DbConnection`: the relational store behind the
//!   connection pool. The crate never opens database connections itself;
//!   the embedding service supplies a connector.
//!
//! # Example: custom L2 backend
//!
//! ```rust,ignore
//! use urlscan_core::{L2CacheBackend, async_trait};
//! use std::time::Duration;
//! use anyhow::Result;
//!
//! struct MyDistributedCache { /* ... */ }
//!
//! #[async_trait]
//! impl L2CacheBackend for MyDistributedCache {
//!     async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
//!         // Ok(None) is a miss; Err means the tier is unreachable
//!     }
//!     // ...
//! }
//! ```

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Distributed (L2) cache tier contract
///
/// # Error semantics
///
/// `Ok(None)` from `get` is a cache miss. `Err` from any method means the
/// tier is unreachable (network failure, timeout); the multi-layer cache
/// absorbs it by degrading to L1-only operation rather than propagating it
/// to request handlers.
///
/// # Thread safety
///
/// Implementations must be `Send + Sync`; calls may block on network I/O and
/// are never made while in-process locks are held.
#[async_trait]
pub trait L2CacheBackend: Send + Sync {
    /// Get value from the distributed tier
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Get value together with its remaining TTL
    ///
    /// Used by the multi-layer cache to promote entries into L1 with the
    /// correct remaining lifetime. `None` TTL means the key never expires.
    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(serde_json::Value, Option<Duration>)>>;

    /// Store value with a time-to-live
    async fn set_with_ttl(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<()>;

    /// Remove value from the distributed tier
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key this backend owns (invalidation flows)
    async fn clear(&self) -> Result<()>;

    /// Whether the tier is currently reachable and serving
    async fn health_check(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Minimal SQL parameter value
///
/// The batch processor renders records into rows of these; connector
/// implementations bind them to whatever driver they wrap.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Null,
}

/// Factory for database connections, supplied by the embedding service
///
/// The pool calls `connect` lazily: when it grows toward its core size, when
/// it adds overflow capacity under burst, and when it replaces a connection
/// that failed its health check.
#[async_trait]
pub trait DbConnector: Send + Sync {
    /// Open a fresh connection to the relational store
    async fn connect(&self) -> Result<Box<dyn DbConnection>>;
}

/// A single database connection handle
///
/// Handed out by the pool one owner at a time; statement construction is the
/// caller's business (the pool only manages the handle's lifecycle).
#[async_trait]
pub trait DbConnection: Send {
    /// Cheap liveness probe, run by the pool before handing the connection
    /// out. `false` causes the connection to be discarded and replaced.
    async fn ping(&mut self) -> bool;

    /// Execute a statement with one row of parameters; returns rows affected
    async fn execute(&mut self, statement: &str, params: &[SqlValue]) -> Result<u64>;

    /// Execute a statement once per row, as a single bulk operation
    ///
    /// Must be all-or-nothing: on `Err`, no row may have been persisted.
    /// The batch processor relies on this to fall back to per-row writes
    /// without double-inserting.
    async fn execute_many(&mut self, statement: &str, rows: &[Vec<SqlValue>]) -> Result<u64>;
}

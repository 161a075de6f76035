//! Bounded database connection pool
//!
//! A fixed core of reusable connections plus bounded overflow capacity for
//! bursts. Callers wait fairly (FIFO) for capacity up to an acquire
//! timeout; connections are health-checked before handout, recycled after a
//! maximum lifetime, and transparently replaced when they go bad.
//!
//! Capacity is enforced by a fair semaphore sized `core + overflow`: a
//! caller that times out simply drops its permit, so a failed acquisition
//! can never leak pool capacity. Pool state lives behind a short
//! `parking_lot` mutex that is never held across an await point.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::PoolError;
use crate::stats::{PoolStats, StatsRegistry};
use crate::traits::{DbConnection, DbConnector, SqlValue};

/// Consecutive connect failures before the pool reports itself degraded
const DEGRADED_AFTER_CONNECT_FAILURES: u64 = 3;

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Fixed number of connections the pool maintains for steady load
    pub core_size: usize,
    /// Extra connections allowed beyond the core to absorb bursts
    pub max_overflow: usize,
    /// How long `acquire` waits for capacity before reporting exhaustion
    pub acquire_timeout: Duration,
    /// Connections older than this are discarded on release or reuse
    /// rather than handed out again
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: 20,
            max_overflow: 40,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

impl PoolConfig {
    /// Hard ceiling on live connections
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.core_size + self.max_overflow
    }
}

struct ConnInner {
    id: u64,
    handle: Box<dyn DbConnection>,
    created_at: Instant,
    last_used_at: Instant,
}

struct PoolState {
    idle: VecDeque<ConnInner>,
    /// Ids currently owned by callers; membership is the release contract
    checked_out: HashSet<u64>,
    /// Live connections: idle + checked out + mid-creation reservations
    total: usize,
    closed: bool,
}

struct PoolShared {
    connector: Arc<dyn DbConnector>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    semaphore: Arc<Semaphore>,
    registry: Arc<StatsRegistry>,
    next_id: AtomicU64,
    consecutive_connect_failures: AtomicU64,
}

impl PoolShared {
    /// Return a connection to the idle set, or retire it if the pool is
    /// closed or the connection outlived its maximum lifetime
    fn check_in(&self, mut inner: ConnInner) {
        inner.last_used_at = Instant::now();
        let recycle = inner.created_at.elapsed() >= self.config.max_lifetime;
        let mut state = self.state.lock();
        if state.closed || recycle {
            state.total -= 1;
            drop(state);
            if recycle {
                self.registry
                    .connections_recycled
                    .fetch_add(1, Ordering::Relaxed);
                debug!(id = inner.id, "Connection exceeded max lifetime, recycling");
            } else {
                self.registry
                    .connections_discarded
                    .fetch_add(1, Ordering::Relaxed);
            }
        } else {
            state.idle.push_back(inner);
        }
        // The caller's permit drops after this returns, so a waiter that
        // wakes up always observes the state change made here
    }

    fn discard_live(&self) {
        self.state.lock().total -= 1;
        self.registry
            .connections_discarded
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// A connection checked out of the pool
///
/// Owned by exactly one caller. Prefer returning it with
/// [`ConnectionPool::release`]; dropping it returns it implicitly so an
/// early-exiting caller never leaks capacity.
pub struct PooledConnection {
    inner: Option<ConnInner>,
    pool: std::sync::Weak<PoolShared>,
    // Held for the lifetime of the checkout; dropped last
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Stable id of the underlying connection
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.as_ref().map_or(0, |inner| inner.id)
    }

    /// Age of the underlying connection
    #[must_use]
    pub fn age(&self) -> Duration {
        self.inner
            .as_ref()
            .map_or(Duration::ZERO, |inner| inner.created_at.elapsed())
    }

    fn handle(&mut self) -> Result<&mut Box<dyn DbConnection>> {
        match self.inner.as_mut() {
            Some(inner) => Ok(&mut inner.handle),
            None => anyhow::bail!("connection already released"),
        }
    }

    /// Liveness probe on the raw handle
    pub async fn ping(&mut self) -> bool {
        match self.handle() {
            Ok(handle) => handle.ping().await,
            Err(_) => false,
        }
    }

    /// Execute a statement with one row of parameters
    ///
    /// # Errors
    ///
    /// Propagates the connector's error for a rejected statement.
    pub async fn execute(&mut self, statement: &str, params: &[SqlValue]) -> Result<u64> {
        self.handle()?.execute(statement, params).await
    }

    /// Execute a statement once per row as a single bulk operation
    ///
    /// # Errors
    ///
    /// Propagates the connector's error; the contract guarantees no row was
    /// persisted on failure.
    pub async fn execute_many(&mut self, statement: &str, rows: &[Vec<SqlValue>]) -> Result<u64> {
        self.handle()?.execute_many(statement, rows).await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Some(shared) = self.pool.upgrade() {
                let owned = shared.state.lock().checked_out.remove(&inner.id);
                if owned {
                    shared.check_in(inner);
                }
            }
        }
    }
}

/// Bounded pool of reusable database connections
///
/// Cloning is shallow; all clones share one pool.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Create a pool over the given connector
    ///
    /// Connections are opened lazily on first use, up to
    /// `config.max_size()`.
    pub fn new(
        connector: Arc<dyn DbConnector>,
        config: PoolConfig,
        registry: Arc<StatsRegistry>,
    ) -> Self {
        info!(
            core_size = config.core_size,
            max_overflow = config.max_overflow,
            acquire_timeout_secs = config.acquire_timeout.as_secs(),
            max_lifetime_secs = config.max_lifetime.as_secs(),
            "Initializing connection pool"
        );
        let max_size = config.max_size();
        Self {
            shared: Arc::new(PoolShared {
                connector,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    checked_out: HashSet::new(),
                    total: 0,
                    closed: false,
                }),
                semaphore: Arc::new(Semaphore::new(max_size)),
                registry,
                next_id: AtomicU64::new(1),
                consecutive_connect_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Acquire a connection, waiting up to the configured timeout
    ///
    /// Resolution order: an idle connection that passes its pre-use health
    /// check; otherwise a freshly created one (overflow capacity included).
    /// Waiters are served in FIFO order.
    ///
    /// # Errors
    ///
    /// [`PoolError::Exhausted`] when no connection frees up within the
    /// timeout; [`PoolError::Closed`] after shutdown; [`PoolError::Connect`]
    /// when a fresh connection cannot be established.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        self.acquire_with_timeout(self.shared.config.acquire_timeout)
            .await
    }

    /// [`acquire`](Self::acquire) with a caller-chosen wait bound
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection, PoolError> {
        let shared = &self.shared;
        if shared.state.lock().closed {
            return Err(PoolError::Closed);
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&shared.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                let waited = started.elapsed();
                shared
                    .registry
                    .acquire_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                warn!(waited_ms = waited.as_millis() as u64, "Connection pool exhausted");
                return Err(PoolError::Exhausted { waited });
            }
        };

        // Reuse an idle connection when a healthy one exists
        loop {
            let candidate = shared.state.lock().idle.pop_front();
            let Some(mut conn) = candidate else { break };

            if conn.created_at.elapsed() >= shared.config.max_lifetime {
                shared.state.lock().total -= 1;
                shared
                    .registry
                    .connections_recycled
                    .fetch_add(1, Ordering::Relaxed);
                debug!(id = conn.id, "Idle connection exceeded max lifetime, recycling");
                continue;
            }

            // Pre-use health check, outside any lock
            if conn.handle.ping().await {
                conn.last_used_at = Instant::now();
                let id = conn.id;
                shared.state.lock().checked_out.insert(id);
                return Ok(PooledConnection {
                    inner: Some(conn),
                    pool: Arc::downgrade(shared),
                    _permit: permit,
                });
            }

            shared
                .registry
                .health_check_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(id = conn.id, "Pre-use health check failed, discarding connection");
            shared.discard_live();
            // Fall through: try the next idle connection, else create a
            // transparent replacement below
        }

        self.create_connection(permit).await
    }

    /// Open a fresh connection under a held permit
    async fn create_connection(
        &self,
        permit: OwnedSemaphorePermit,
    ) -> Result<PooledConnection, PoolError> {
        let shared = &self.shared;

        // Reserve the slot before the (slow) connect so accounting can
        // never exceed max_size
        {
            let mut state = shared.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.total += 1;
        }

        match shared.connector.connect().await {
            Ok(handle) => {
                shared
                    .consecutive_connect_failures
                    .store(0, Ordering::Relaxed);
                shared.registry.set_pool_degraded(false);
                shared
                    .registry
                    .connections_created
                    .fetch_add(1, Ordering::Relaxed);

                let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                let now = Instant::now();
                shared.state.lock().checked_out.insert(id);
                debug!(id, "Opened new database connection");

                Ok(PooledConnection {
                    inner: Some(ConnInner {
                        id,
                        handle,
                        created_at: now,
                        last_used_at: now,
                    }),
                    pool: Arc::downgrade(shared),
                    _permit: permit,
                })
            }
            Err(err) => {
                shared.state.lock().total -= 1;
                let failures = shared
                    .consecutive_connect_failures
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if failures >= DEGRADED_AFTER_CONNECT_FAILURES {
                    shared.registry.set_pool_degraded(true);
                    error!(failures, error = %err, "Repeated connection failures, pool degraded");
                } else {
                    warn!(error = %err, "Failed to open database connection");
                }
                Err(PoolError::Connect(err.to_string()))
            }
        }
    }

    /// Return a connection to the pool
    ///
    /// Connections past their maximum lifetime are recycled (discarded and
    /// lazily replaced) instead of re-idled.
    ///
    /// # Errors
    ///
    /// [`PoolError::DoubleRelease`] if this pool does not own the
    /// connection - a caller bug, reported loudly and counted.
    pub fn release(&self, mut conn: PooledConnection) -> Result<(), PoolError> {
        let shared = &self.shared;
        let Some(inner) = conn.inner.take() else {
            // Unreachable through the public API; kept as a defensive report
            shared.registry.double_releases.fetch_add(1, Ordering::Relaxed);
            return Err(PoolError::DoubleRelease { id: 0 });
        };

        let foreign = !conn.pool.ptr_eq(&Arc::downgrade(shared));
        let owned = !foreign && shared.state.lock().checked_out.remove(&inner.id);
        if !owned {
            let id = inner.id;
            shared.registry.double_releases.fetch_add(1, Ordering::Relaxed);
            error!(id, "Connection released twice or into a pool that does not own it");
            // The stray handle is dropped here; settle the owning pool's
            // accounting since taking `inner` bypassed its Drop path
            if foreign {
                if let Some(owner) = conn.pool.upgrade() {
                    if owner.state.lock().checked_out.remove(&id) {
                        owner.discard_live();
                    }
                }
            }
            return Err(PoolError::DoubleRelease { id });
        }

        shared.check_in(inner);
        Ok(())
        // conn (and its permit) drop here, waking one waiter
    }

    /// Current pool gauges and lifetime counters
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let (total, idle, checked_out) = {
            let state = shared.state.lock();
            (state.total, state.idle.len(), state.checked_out.len())
        };
        let registry = &shared.registry;

        PoolStats {
            db_connections_open: total as u64,
            db_connections_idle: idle as u64,
            db_connections_checked_out: checked_out as u64,
            db_connections_overflow: total.saturating_sub(shared.config.core_size) as u64,
            connections_created_total: registry.connections_created.load(Ordering::Relaxed),
            connections_recycled_total: registry.connections_recycled.load(Ordering::Relaxed),
            connections_discarded_total: registry.connections_discarded.load(Ordering::Relaxed),
            health_check_failures_total: registry.health_check_failures.load(Ordering::Relaxed),
            acquire_timeouts_total: registry.acquire_timeouts.load(Ordering::Relaxed),
            double_releases_total: registry.double_releases.load(Ordering::Relaxed),
            utilization_percent: if shared.config.core_size > 0 {
                checked_out as f64 / shared.config.core_size as f64 * 100.0
            } else {
                0.0
            },
            degraded: registry.pool_degraded(),
        }
    }

    /// Close the pool: reject further acquires and drop idle connections
    ///
    /// Connections currently checked out are retired as they come back.
    pub fn close(&self) {
        let shared = &self.shared;
        let dropped = {
            let mut state = shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let dropped = state.idle.len();
            state.total -= dropped;
            state.idle.clear();
            dropped
        };
        shared.semaphore.close();
        shared
            .registry
            .connections_discarded
            .fetch_add(dropped as u64, Ordering::Relaxed);
        info!(dropped, "Connection pool closed");
    }
}

//! Shared test infrastructure
//!
//! Mock implementations of the two external collaborators:
//! - `FlakyL2`: an in-process L2 backend with a switchable outage, for
//!   degradation tests
//! - `MockConnector` / `MockConnection`: a scriptable relational store that
//!   records every persisted row and can fail connects, pings and
//!   individual rows on demand
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use urlscan_core::{
    DbConnection, DbConnector, FeedbackRecord, FeedbackType, L2CacheBackend, MemoryCache,
    RecordPayload, ScanRecord, SqlValue, ThreatLevel, Verdict, async_trait,
};
use uuid::Uuid;

/// Initialize tracing once per test binary; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Unique test key, to avoid cross-test collisions
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

pub fn verdict(is_phishing: bool) -> Verdict {
    Verdict {
        is_phishing,
        confidence: if is_phishing { 0.96 } else { 0.12 },
        threat_level: if is_phishing {
            ThreatLevel::High
        } else {
            ThreatLevel::Low
        },
        risk_factors: if is_phishing {
            vec!["punycode_host".to_string(), "young_domain".to_string()]
        } else {
            Vec::new()
        },
    }
}

/// Scan payload for a URL; urls containing "poison" are rejected by the
/// mock store
pub fn scan_payload(url: &str) -> RecordPayload {
    RecordPayload::Scan(ScanRecord::from_verdict(
        url,
        format!("fp:{url}"),
        None,
        &verdict(true),
        17,
        1_700_000_000_000,
    ))
}

pub fn feedback_payload(url: &str) -> RecordPayload {
    RecordPayload::Feedback(FeedbackRecord {
        scan_id: Uuid::new_v4(),
        url: url.to_string(),
        reported_phishing: false,
        feedback_type: FeedbackType::FalsePositive,
        comment: Some("legitimate banking site".to_string()),
        recorded_at: 1_700_000_000_000,
    })
}

// ===== Distributed-tier mock =====

/// In-process L2 backend with a switchable simulated outage
pub struct FlakyL2 {
    /// Reachable store; tests seed it directly to simulate L2-only state
    pub inner: MemoryCache,
    unavailable: AtomicBool,
}

impl FlakyL2 {
    pub fn new() -> Self {
        Self {
            inner: MemoryCache::new(),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            anyhow::bail!("simulated L2 outage");
        }
        Ok(())
    }
}

#[async_trait]
impl L2CacheBackend for FlakyL2 {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.check_reachable()?;
        self.inner.get(key).await
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(serde_json::Value, Option<Duration>)>> {
        self.check_reachable()?;
        self.inner.get_with_ttl(key).await
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        self.check_reachable()?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_reachable()?;
        self.inner.remove(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.check_reachable()?;
        self.inner.clear().await
    }

    async fn health_check(&self) -> bool {
        !self.unavailable.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "flaky-l2"
    }
}

// ===== Relational-store mock =====

/// Shared state of the mock relational store
#[derive(Default)]
pub struct MockDb {
    /// Successful connects so far
    pub connects: AtomicUsize,
    /// When set, `connect` fails
    pub fail_connect: AtomicBool,
    /// Connection ids whose `ping` reports dead
    pub dead_connections: Mutex<HashSet<u64>>,
    /// Every persisted row, with the statement that wrote it
    pub rows: Mutex<Vec<(String, Vec<SqlValue>)>>,
    /// `execute_many` invocations (successful or rejected)
    pub bulk_calls: AtomicUsize,
    /// `execute` invocations (successful or rejected)
    pub single_calls: AtomicUsize,
    next_conn_id: AtomicU64,
}

impl MockDb {
    pub fn persisted(&self) -> usize {
        self.rows.lock().len()
    }

    /// Mark a connection id as failing its liveness probe
    pub fn kill_connection(&self, id: u64) {
        self.dead_connections.lock().insert(id);
    }

    fn row_is_poisoned(row: &[SqlValue]) -> bool {
        row.iter()
            .any(|value| matches!(value, SqlValue::Text(text) if text.contains("poison")))
    }
}

/// Connector handing out [`MockConnection`]s over one shared [`MockDb`]
pub struct MockConnector {
    pub db: Arc<MockDb>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, Arc<MockDb>) {
        let db = Arc::new(MockDb::default());
        (
            Arc::new(Self {
                db: Arc::clone(&db),
            }),
            db,
        )
    }
}

#[async_trait]
impl DbConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn DbConnection>> {
        if self.db.fail_connect.load(Ordering::Relaxed) {
            anyhow::bail!("simulated connect failure");
        }
        let id = self.db.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.db.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MockConnection {
            id,
            db: Arc::clone(&self.db),
        }))
    }
}

pub struct MockConnection {
    /// Sequential id, 1-based in connect order
    pub id: u64,
    db: Arc<MockDb>,
}

#[async_trait]
impl DbConnection for MockConnection {
    async fn ping(&mut self) -> bool {
        !self.db.dead_connections.lock().contains(&self.id)
    }

    async fn execute(&mut self, statement: &str, params: &[SqlValue]) -> Result<u64> {
        self.db.single_calls.fetch_add(1, Ordering::Relaxed);
        if MockDb::row_is_poisoned(params) {
            anyhow::bail!("malformed row rejected");
        }
        self.db
            .rows
            .lock()
            .push((statement.to_string(), params.to_vec()));
        Ok(1)
    }

    async fn execute_many(&mut self, statement: &str, rows: &[Vec<SqlValue>]) -> Result<u64> {
        self.db.bulk_calls.fetch_add(1, Ordering::Relaxed);
        // All-or-nothing, like a real transactional bulk insert
        if rows.iter().any(|row| MockDb::row_is_poisoned(row)) {
            anyhow::bail!("bulk insert rejected: malformed row in batch");
        }
        let mut persisted = self.db.rows.lock();
        for row in rows {
            persisted.push((statement.to_string(), row.clone()));
        }
        Ok(rows.len() as u64)
    }
}

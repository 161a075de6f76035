//! Batching write buffer for scan and feedback records
//!
//! Accumulates write records and persists them in bulk when the buffer
//! reaches its size threshold or a background timer fires, whichever comes
//! first. A rejected bulk write falls back to per-record writes so one bad
//! record cannot sink the rest of its batch.
//!
//! The active buffer is swapped out atomically under its mutex: a record is
//! visible in exactly one flushed batch, never two, never neither. A flush
//! gate serializes flushes so a timer tick and a size trigger cannot race.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::BatchError;
use crate::pool::ConnectionPool;
use crate::record::{BatchRecord, RecordPayload};
use crate::stats::{BatchStats, StatsRegistry};
use crate::traits::SqlValue;

/// Bulk insert for completed scans; one row per record
const INSERT_SCANS: &str = "INSERT INTO scans (scan_id, url, url_hash, user_id, is_phishing, \
     confidence, threat_level, risk_factors, scan_duration_ms, recorded_at) \
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// Bulk insert for user feedback; one row per record
const INSERT_FEEDBACK: &str = "INSERT INTO feedback (scan_id, url, reported_phishing, \
     feedback_type, comment, recorded_at) \
     VALUES (?, ?, ?, ?, ?, ?)";

/// Batch processor configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Buffer size that triggers an automatic flush
    pub size_threshold: usize,
    /// Background flush period bounding write latency in quiet periods
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size_threshold: 100,
            flush_interval: Duration::from_secs(30),
        }
    }
}

/// One record that could not be persisted by bulk or fallback write
#[derive(Debug, Clone)]
pub struct FlushFailure {
    pub scan_id: Uuid,
    pub error: String,
}

/// Outcome of one flush
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Records in the flushed batch
    pub attempted: usize,
    /// Records persisted by the bulk writes
    pub bulk_inserted: usize,
    /// Records persisted one at a time after a bulk rejection
    pub fallback_inserted: usize,
    /// Records lost; partial success is allowed
    pub failed: Vec<FlushFailure>,
}

impl FlushReport {
    /// Records made durable by this flush
    #[must_use]
    pub fn flushed(&self) -> usize {
        self.bulk_inserted + self.fallback_inserted
    }
}

struct BatchInner {
    pool: ConnectionPool,
    config: BatchConfig,
    buffer: Mutex<Vec<BatchRecord>>,
    /// Serializes flushes; each swapped-out buffer is flushed exactly once
    flush_gate: tokio::sync::Mutex<()>,
    registry: Arc<StatsRegistry>,
}

impl BatchInner {
    /// Swap the active buffer for an empty one
    fn take_buffer(&self) -> Vec<BatchRecord> {
        std::mem::take(&mut *self.buffer.lock())
    }

    /// Persist one swapped-out batch: bulk write per record kind, per-record
    /// fallback on bulk rejection
    async fn flush_batch(&self, batch: Vec<BatchRecord>) -> Result<FlushReport, BatchError> {
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let _gate = self.flush_gate.lock().await;
        let registry = &self.registry;

        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(err) => {
                // The flush fails visibly; these records are not retried
                registry
                    .bulk_flush_failures
                    .fetch_add(1, Ordering::Relaxed);
                registry
                    .records_dropped
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                error!(
                    records = batch.len(),
                    error = %err,
                    "Batch flush could not obtain a connection, records dropped"
                );
                return Err(BatchError::Pool(err));
            }
        };

        let mut report = FlushReport {
            attempted: batch.len(),
            ..FlushReport::default()
        };

        let mut scans: Vec<&BatchRecord> = Vec::new();
        let mut feedback: Vec<&BatchRecord> = Vec::new();
        for record in &batch {
            match &record.payload {
                RecordPayload::Scan(_) => scans.push(record),
                RecordPayload::Feedback(_) => feedback.push(record),
            }
        }

        for (statement, records) in [(INSERT_SCANS, scans), (INSERT_FEEDBACK, feedback)] {
            if records.is_empty() {
                continue;
            }
            let rows: Vec<Vec<SqlValue>> = records
                .iter()
                .map(|record| match &record.payload {
                    RecordPayload::Scan(scan) => scan.sql_row(),
                    RecordPayload::Feedback(fb) => fb.sql_row(),
                })
                .collect();

            match conn.execute_many(statement, &rows).await {
                Ok(_) => {
                    registry.bulk_flushes.fetch_add(1, Ordering::Relaxed);
                    registry
                        .records_flushed
                        .fetch_add(records.len() as u64, Ordering::Relaxed);
                    report.bulk_inserted += records.len();
                    debug!(records = records.len(), "Bulk insert committed");
                }
                Err(bulk_err) => {
                    // Bulk write is all-or-nothing; retry each record alone
                    registry
                        .bulk_flush_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        records = records.len(),
                        error = %bulk_err,
                        "Bulk insert rejected, falling back to per-record writes"
                    );

                    for (record, row) in records.iter().zip(&rows) {
                        registry.fallback_writes.fetch_add(1, Ordering::Relaxed);
                        match conn.execute(statement, row).await {
                            Ok(_) => {
                                registry.records_flushed.fetch_add(1, Ordering::Relaxed);
                                report.fallback_inserted += 1;
                            }
                            Err(err) => {
                                registry.write_failures.fetch_add(1, Ordering::Relaxed);
                                registry.records_dropped.fetch_add(1, Ordering::Relaxed);
                                warn!(scan_id = %record.scan_id(), error = %err, "Record write failed");
                                report.failed.push(FlushFailure {
                                    scan_id: record.scan_id(),
                                    error: err.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if let Err(err) = self.pool.release(conn) {
            warn!(error = %err, "Failed to return flush connection to the pool");
        }

        if report.failed.is_empty() {
            Ok(report)
        } else {
            Err(BatchError::BulkRejected { report })
        }
    }
}

/// Size- and time-triggered buffered writer over the connection pool
pub struct BatchProcessor {
    inner: Arc<BatchInner>,
    shutdown_tx: broadcast::Sender<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl BatchProcessor {
    /// Create the processor and start its background flush timer
    pub fn new(pool: ConnectionPool, config: BatchConfig, registry: Arc<StatsRegistry>) -> Self {
        info!(
            size_threshold = config.size_threshold,
            flush_interval_secs = config.flush_interval.as_secs(),
            "Initializing batch processor"
        );

        let inner = Arc::new(BatchInner {
            pool,
            config,
            buffer: Mutex::new(Vec::new()),
            flush_gate: tokio::sync::Mutex::new(()),
            registry,
        });
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let timer = Self::spawn_flush_timer(Arc::clone(&inner), shutdown_rx);

        Self {
            inner,
            shutdown_tx,
            timer: Mutex::new(Some(timer)),
        }
    }

    /// Background task flushing whatever is pending every `flush_interval`,
    /// with a final flush on shutdown
    fn spawn_flush_timer(
        inner: Arc<BatchInner>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = inner.config.flush_interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pending = inner.take_buffer();
                        if pending.is_empty() {
                            continue;
                        }
                        debug!(records = pending.len(), "Timer-driven batch flush");
                        if let Err(err) = inner.flush_batch(pending).await {
                            warn!(error = %err, "Timer-driven flush failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Batch flush timer shutting down");
                        break;
                    }
                }
            }

            // Drain whatever accumulated since the last tick
            let pending = inner.take_buffer();
            if !pending.is_empty() {
                info!(records = pending.len(), "Final batch flush on shutdown");
                if let Err(err) = inner.flush_batch(pending).await {
                    warn!(error = %err, "Final flush failed");
                }
            }
        })
    }

    /// Append a record to the active buffer
    ///
    /// When the buffer reaches the size threshold it is swapped out and
    /// flushed before `add` returns, so writers see backpressure and flush
    /// failures directly.
    ///
    /// # Errors
    ///
    /// Propagates the flush outcome when this call triggered one: pool
    /// exhaustion, or a report-carrying error for records that failed their
    /// fallback writes.
    pub async fn add(&self, payload: RecordPayload) -> Result<(), BatchError> {
        self.inner
            .registry
            .records_enqueued
            .fetch_add(1, Ordering::Relaxed);

        let full_batch = {
            let mut buffer = self.inner.buffer.lock();
            buffer.push(BatchRecord::new(payload));
            if buffer.len() >= self.inner.config.size_threshold {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };

        match full_batch {
            Some(batch) => self.inner.flush_batch(batch).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Flush everything pending right now
    ///
    /// # Errors
    ///
    /// Same semantics as a size-triggered flush.
    pub async fn flush(&self) -> Result<FlushReport, BatchError> {
        self.inner.flush_batch(self.inner.take_buffer()).await
    }

    /// Buffer gauge plus lifetime counters
    #[must_use]
    pub fn stats(&self) -> BatchStats {
        let registry = &self.inner.registry;
        BatchStats {
            records_pending: self.inner.buffer.lock().len() as u64,
            records_enqueued_total: registry.records_enqueued.load(Ordering::Relaxed),
            records_flushed_total: registry.records_flushed.load(Ordering::Relaxed),
            bulk_flushes_total: registry.bulk_flushes.load(Ordering::Relaxed),
            bulk_flush_failures_total: registry.bulk_flush_failures.load(Ordering::Relaxed),
            fallback_writes_total: registry.fallback_writes.load(Ordering::Relaxed),
            write_failures_total: registry.write_failures.load(Ordering::Relaxed),
            records_dropped_total: registry.records_dropped.load(Ordering::Relaxed),
            size_threshold: self.inner.config.size_threshold as u64,
        }
    }

    /// Stop the flush timer and run its final flush
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let timer = self.timer.lock().take();
        if let Some(handle) = timer {
            if let Err(err) = handle.await {
                warn!(error = %err, "Flush timer task ended abnormally");
            }
        }
    }
}

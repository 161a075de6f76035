//! Error taxonomy for the performance core
//!
//! Only two conditions are ever surfaced to callers: pool exhaustion and a
//! bulk write that could not be recovered by per-record fallback. Everything
//! else (L2 unavailability, health-check failures) is absorbed locally and
//! reported through the statistics registry.

use std::time::Duration;

use thiserror::Error;

use crate::batch::FlushReport;

/// Errors from [`ConnectionPool`](crate::pool::ConnectionPool) operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// No connection became available within the acquire timeout.
    ///
    /// Surfaced to the caller and never retried internally; the caller
    /// decides whether to retry the whole operation.
    #[error("connection pool exhausted: no connection available after {waited:?}")]
    Exhausted {
        /// How long the caller waited before giving up
        waited: Duration,
    },

    /// The pool has been closed; no further connections are handed out.
    #[error("connection pool is closed")]
    Closed,

    /// A fresh connection could not be established.
    ///
    /// Repeated occurrences flip the pool-degraded flag in the registry.
    #[error("failed to establish database connection: {0}")]
    Connect(String),

    /// Contract violation: a connection was released twice, or released into
    /// a pool that does not own it. Indicates a caller bug; reported loudly.
    #[error("connection {id} released twice or into a pool that does not own it")]
    DoubleRelease {
        /// Id of the offending connection
        id: u64,
    },
}

/// Errors from [`BatchProcessor`](crate::batch::BatchProcessor) flushes
#[derive(Debug, Error)]
pub enum BatchError {
    /// The flush could not obtain a database connection; the affected
    /// records are counted as dropped in the registry.
    #[error("batch flush could not obtain a connection: {0}")]
    Pool(#[from] PoolError),

    /// The bulk write was rejected and at least one record also failed its
    /// individual fallback write. Partial success is allowed; the report
    /// lists exactly which records were lost.
    #[error("bulk write rejected: {} of {} records failed individual fallback", report.failed.len(), report.attempted)]
    BulkRejected {
        /// Per-record outcome of the fallback pass
        report: FlushReport,
    },
}

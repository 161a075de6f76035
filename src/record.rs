//! Record schema for the scan/feedback write stream
//!
//! The write path carries exactly two row shapes, fixed at compile time:
//! scan results and user feedback. The classifier's verdict is part of the
//! scan record and is also what the cache stores (as JSON) per URL
//! fingerprint.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::traits::SqlValue;

/// Threat level assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Stable string form used in persisted rows
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Classifier output for a single URL
///
/// The classifier itself is an external collaborator; this is only the shape
/// of its result, which flows into the cache and the scan record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_phishing: bool,
    /// Model confidence in `[0, 1]`
    pub confidence: f64,
    pub threat_level: ThreatLevel,
    /// Human-readable reasons contributing to the verdict
    pub risk_factors: Vec<String>,
}

/// One completed URL scan, queued for bulk insertion into `scans`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_id: Uuid,
    pub url: String,
    /// Content fingerprint of the URL; also the cache key
    pub url_hash: String,
    pub user_id: Option<String>,
    pub is_phishing: bool,
    pub confidence: f64,
    pub threat_level: ThreatLevel,
    pub risk_factors: Vec<String>,
    pub scan_duration_ms: u64,
    /// Unix timestamp in milliseconds
    pub recorded_at: i64,
}

impl ScanRecord {
    /// Build a record from a verdict, assigning a fresh scan id
    #[must_use]
    pub fn from_verdict(
        url: impl Into<String>,
        url_hash: impl Into<String>,
        user_id: Option<String>,
        verdict: &Verdict,
        scan_duration_ms: u64,
        recorded_at: i64,
    ) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            url: url.into(),
            url_hash: url_hash.into(),
            user_id,
            is_phishing: verdict.is_phishing,
            confidence: verdict.confidence,
            threat_level: verdict.threat_level,
            risk_factors: verdict.risk_factors.clone(),
            scan_duration_ms,
            recorded_at,
        }
    }

    pub(crate) fn sql_row(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.scan_id.to_string()),
            SqlValue::Text(self.url.clone()),
            SqlValue::Text(self.url_hash.clone()),
            self.user_id
                .clone()
                .map_or(SqlValue::Null, SqlValue::Text),
            SqlValue::Bool(self.is_phishing),
            SqlValue::Real(self.confidence),
            SqlValue::Text(self.threat_level.as_str().to_string()),
            // risk factors travel as a JSON array in a text column
            SqlValue::Text(
                serde_json::to_string(&self.risk_factors).unwrap_or_else(|_| "[]".to_string()),
            ),
            SqlValue::Integer(self.scan_duration_ms as i64),
            SqlValue::Integer(self.recorded_at),
        ]
    }
}

/// Kind of user feedback on a completed scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    FalsePositive,
    FalseNegative,
    Confirmation,
}

impl FeedbackType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FalsePositive => "false_positive",
            Self::FalseNegative => "false_negative",
            Self::Confirmation => "confirmation",
        }
    }
}

/// User feedback on a scan verdict, queued for bulk insertion into `feedback`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub scan_id: Uuid,
    pub url: String,
    /// What the user says the verdict should have been
    pub reported_phishing: bool,
    pub feedback_type: FeedbackType,
    pub comment: Option<String>,
    /// Unix timestamp in milliseconds
    pub recorded_at: i64,
}

impl FeedbackRecord {
    pub(crate) fn sql_row(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.scan_id.to_string()),
            SqlValue::Text(self.url.clone()),
            SqlValue::Bool(self.reported_phishing),
            SqlValue::Text(self.feedback_type.as_str().to_string()),
            self.comment
                .clone()
                .map_or(SqlValue::Null, SqlValue::Text),
            SqlValue::Integer(self.recorded_at),
        ]
    }
}

/// Write payload accepted by the batch processor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Scan(ScanRecord),
    Feedback(FeedbackRecord),
}

/// A payload plus the moment it entered the buffer
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub payload: RecordPayload,
    pub enqueued_at: Instant,
}

impl BatchRecord {
    pub(crate) fn new(payload: RecordPayload) -> Self {
        Self {
            payload,
            enqueued_at: Instant::now(),
        }
    }

    /// Identifier used in flush reports
    #[must_use]
    pub fn scan_id(&self) -> Uuid {
        match &self.payload {
            RecordPayload::Scan(r) => r.scan_id,
            RecordPayload::Feedback(r) => r.scan_id,
        }
    }
}

//! Decisions, reasons, and baseline summaries

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::snapshot::MetricValue;

/// Stable reason codes. Consumers key on these, not on messages.
pub mod codes {
    pub const COLLECT_FAILED: &str = "COLLECT_FAILED";
    pub const VOLUME_ZERO: &str = "VOLUME_ZERO";
    pub const VOLUME_BELOW_MINIMUM: &str = "VOLUME_BELOW_MINIMUM";
    pub const VOLUME_DEVIATION: &str = "VOLUME_DEVIATION";
    pub const DATA_STALE: &str = "DATA_STALE";
}

/// Health verdict for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionStatus {
    Ok,
    Warning,
    Anomaly,
    /// Sentinel for "no decision yet"; never produced by the engine
    Unknown,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Ok => "OK",
            DecisionStatus::Warning => "WARNING",
            DecisionStatus::Anomaly => "ANOMALY",
            DecisionStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(DecisionStatus::Ok),
            "WARNING" => Some(DecisionStatus::Warning),
            "ANOMALY" => Some(DecisionStatus::Anomaly),
            "UNKNOWN" => Some(DecisionStatus::Unknown),
            _ => None,
        }
    }

    /// Degraded means an alert-worthy state
    pub fn is_degraded(&self) -> bool {
        matches!(self, DecisionStatus::Warning | DecisionStatus::Anomaly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// A single finding contributing to a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl Reason {
    pub fn critical(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity: Severity::Critical,
            details: BTreeMap::new(),
        }
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity: Severity::Warning,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Rolling statistics over recent successful snapshots.
///
/// Statistics are null until enough samples exist; `snapshot_count` says
/// how many contributed. Never stored, recomputed per check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSummary {
    pub snapshot_count: usize,
    pub row_count_median: Option<f64>,
    pub row_count_min: Option<f64>,
    pub row_count_max: Option<f64>,
    pub row_count_stddev: Option<f64>,
    pub expected_interval_seconds: Option<f64>,
    #[serde(skip)]
    pub oldest_snapshot_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub newest_snapshot_at: Option<DateTime<Utc>>,
}

/// Verdict for one snapshot against its baseline and policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub status: DecisionStatus,
    pub reasons: Vec<Reason>,
    pub metrics: BTreeMap<String, MetricValue>,
    pub baseline: Option<BaselineSummary>,
    pub confidence: f64,
}

impl Decision {
    /// Digest of the sorted multiset of reason codes, as a short hex
    /// string. Messages and details do not contribute.
    pub fn reason_hash(&self) -> String {
        reason_hash(self.reasons.iter().map(|r| r.code.as_str()))
    }
}

/// Hash of reason codes used for alert deduplication
pub fn reason_hash<'a>(codes: impl Iterator<Item = &'a str>) -> String {
    let mut sorted: Vec<&str> = codes.collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for code in &sorted {
        hasher.update(code.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

//! Probe results and the scalar values they carry

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rfc3339z;

/// Outcome of a single collection probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectStatus {
    Success,
    CollectFailed,
}

impl CollectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectStatus::Success => "SUCCESS",
            CollectStatus::CollectFailed => "COLLECT_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(CollectStatus::Success),
            "COLLECT_FAILED" => Some(CollectStatus::CollectFailed),
            _ => None,
        }
    }
}

/// Scalar value stored in snapshot metric and metadata maps.
///
/// Deserialization is untagged; RFC3339 strings become timestamps, any
/// other string stays text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(#[serde(with = "rfc3339z")] DateTime<Utc>),
    Text(String),
}

impl MetricValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetricValue::Int(v) => Some(*v),
            MetricValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            MetricValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for MetricValue {
    fn from(v: DateTime<Utc>) -> Self {
        MetricValue::Timestamp(v)
    }
}

/// One probe result for one source at one instant.
///
/// A failed probe carries no metrics; its error details live in metadata
/// under `error_code` and `error_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Ledger-assigned id, absent until stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub source_name: String,
    #[serde(with = "rfc3339z")]
    pub collected_at: DateTime<Utc>,
    pub collect_status: CollectStatus,
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetricValue>,
}

impl Snapshot {
    /// A successful probe with the given metric map
    pub fn success(
        source_name: impl Into<String>,
        collected_at: DateTime<Utc>,
        metrics: BTreeMap<String, MetricValue>,
    ) -> Self {
        Self {
            id: None,
            source_name: source_name.into(),
            collected_at,
            collect_status: CollectStatus::Success,
            metrics,
            metadata: BTreeMap::new(),
        }
    }

    /// A failed probe. Metrics stay empty so `row_count` and
    /// `latest_timestamp` read as null.
    pub fn failed(
        source_name: impl Into<String>,
        collected_at: DateTime<Utc>,
        error_code: &str,
        error_message: &str,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("error_code".to_string(), MetricValue::from(error_code));
        metadata.insert(
            "error_message".to_string(),
            MetricValue::from(error_message),
        );
        Self {
            id: None,
            source_name: source_name.into(),
            collected_at,
            collect_status: CollectStatus::CollectFailed,
            metrics: BTreeMap::new(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: MetricValue) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.collect_status == CollectStatus::Success
    }

    /// Row count reported by the probe; negative values read as null
    pub fn row_count(&self) -> Option<u64> {
        match self.metrics.get("row_count") {
            Some(MetricValue::Int(v)) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Most recent data timestamp reported by the probe
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        match self.metrics.get("latest_timestamp") {
            Some(MetricValue::Timestamp(ts)) => Some(*ts),
            Some(MetricValue::Text(s)) => rfc3339z::parse(s),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.metadata.get("error_message").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_failed_snapshot_has_null_metrics() {
        let snap = Snapshot::failed("orders", instant(), "connection_failed", "refused");
        assert_eq!(snap.row_count(), None);
        assert_eq!(snap.latest_timestamp(), None);
        assert_eq!(snap.error_message(), Some("refused"));
    }

    #[test]
    fn test_success_accessors() {
        let mut metrics = BTreeMap::new();
        metrics.insert("row_count".to_string(), MetricValue::Int(1000));
        metrics.insert("latest_timestamp".to_string(), MetricValue::from(instant()));
        let snap = Snapshot::success("orders", instant(), metrics);

        assert!(snap.is_success());
        assert_eq!(snap.row_count(), Some(1000));
        assert_eq!(snap.latest_timestamp(), Some(instant()));
    }

    #[test]
    fn test_zero_row_count_is_a_value() {
        let mut metrics = BTreeMap::new();
        metrics.insert("row_count".to_string(), MetricValue::Int(0));
        let snap = Snapshot::success("orders", instant(), metrics);
        assert_eq!(snap.row_count(), Some(0));
    }

    #[test]
    fn test_negative_row_count_reads_null() {
        let mut metrics = BTreeMap::new();
        metrics.insert("row_count".to_string(), MetricValue::Int(-1));
        let snap = Snapshot::success("orders", instant(), metrics);
        assert_eq!(snap.row_count(), None);
    }

    #[test]
    fn test_metric_value_untagged_round_trip() {
        let values = vec![
            MetricValue::Null,
            MetricValue::Bool(true),
            MetricValue::Int(42),
            MetricValue::Float(1.5),
            MetricValue::from(instant()),
            MetricValue::from("plain text"),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<MetricValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(values, back);
    }

    #[test]
    fn test_collect_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&CollectStatus::CollectFailed).unwrap(),
            "\"COLLECT_FAILED\""
        );
        assert_eq!(CollectStatus::parse("SUCCESS"), Some(CollectStatus::Success));
        assert_eq!(CollectStatus::parse("bogus"), None);
    }
}

//! Persisted alert state and delivery records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::DecisionStatus;
use super::payload::EventType;

/// Per-(source, target) memory of what was last notified.
///
/// Exactly one row exists per pair once the pair has been evaluated;
/// a pair that has never emitted holds the `Unknown` sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub source_name: String,
    pub target_name: String,
    pub notified_status: DecisionStatus,
    pub notified_reason_hash: String,
    pub last_change_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl AlertState {
    /// State for a pair that has been evaluated but never notified
    pub fn sentinel(
        source_name: impl Into<String>,
        target_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            target_name: target_name.into(),
            notified_status: DecisionStatus::Unknown,
            notified_reason_hash: String::new(),
            last_change_at: now,
            last_sent_at: None,
            cooldown_until: None,
        }
    }

    /// Whether the cooldown window is still open at `now`
    pub fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// Outcome of one webhook delivery, over all attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub attempts: u32,
}

impl DeliveryResult {
    pub fn succeeded(status_code: u16, latency_ms: u64, attempts: u32) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            latency_ms,
            error: None,
            attempts,
        }
    }

    pub fn failed(
        status_code: Option<u16>,
        latency_ms: u64,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            success: false,
            status_code,
            latency_ms,
            error: Some(error.into()),
            attempts,
        }
    }
}

/// Append-only audit row for one delivery attempt sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub source_name: String,
    pub target_name: String,
    pub event_type: EventType,
    pub payload_hash: String,
    pub sent_at: DateTime<Utc>,
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,
    pub error_message: Option<String>,
    pub attempts: u32,
}

impl DeliveryRecord {
    pub fn from_result(
        source_name: impl Into<String>,
        target_name: impl Into<String>,
        event_type: EventType,
        payload_hash: impl Into<String>,
        sent_at: DateTime<Utc>,
        result: &DeliveryResult,
    ) -> Self {
        Self {
            id: None,
            source_name: source_name.into(),
            target_name: target_name.into(),
            event_type,
            payload_hash: payload_hash.into(),
            sent_at,
            success: result.success,
            status_code: result.status_code,
            latency_ms: Some(result.latency_ms),
            error_message: result.error.clone(),
            attempts: result.attempts,
        }
    }
}

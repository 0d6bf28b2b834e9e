//! Webhook payload wire format.
//!
//! Canonical JSON is the serde output of [`WebhookPayload`] in field
//! declaration order, UTF-8, no trailing newline. The payload hash and the
//! HMAC signature are both computed over those exact bytes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::decision::{BaselineSummary, Decision, DecisionStatus, Reason};
use super::rfc3339z;
use super::snapshot::MetricValue;

/// Kind of notification carried by a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Anomaly,
    Warning,
    Recovery,
    /// Test payloads only; never emitted by the state machine
    Info,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Anomaly => "anomaly",
            EventType::Warning => "warning",
            EventType::Recovery => "recovery",
            EventType::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anomaly" => Some(EventType::Anomaly),
            "warning" => Some(EventType::Warning),
            "recovery" => Some(EventType::Recovery),
            "info" => Some(EventType::Info),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionBody {
    pub status: DecisionStatus,
    pub reasons: Vec<Reason>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: String,
}

/// Versioned webhook body. Field order here is the wire order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub version: String,
    pub event_id: String,
    pub event_type: EventType,
    #[serde(with = "rfc3339z")]
    pub timestamp: DateTime<Utc>,
    pub source: SourceRef,
    pub decision: DecisionBody,
    pub metrics: BTreeMap<String, MetricValue>,
    pub baseline: BaselineSummary,
    pub context: AgentContext,
}

impl WebhookPayload {
    /// Mint a payload for a decision. Every call gets a fresh event id.
    pub fn for_decision(
        source_name: &str,
        source_type: &str,
        event_type: EventType,
        decision: &Decision,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version: "1".to_string(),
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: now,
            source: SourceRef {
                name: source_name.to_string(),
                source_type: source_type.to_string(),
            },
            decision: DecisionBody {
                status: decision.status,
                reasons: decision.reasons.clone(),
                confidence: decision.confidence,
            },
            metrics: decision.metrics.clone(),
            baseline: decision.baseline.clone().unwrap_or_default(),
            context: AgentContext {
                agent_id: agent_id.to_string(),
            },
        }
    }

    /// Synthetic `info` payload used by webhook connectivity tests
    pub fn test_payload(agent_id: &str, now: DateTime<Utc>) -> Self {
        let mut metrics = BTreeMap::new();
        metrics.insert("row_count".to_string(), MetricValue::Int(1000));
        metrics.insert("test".to_string(), MetricValue::Bool(true));
        Self {
            version: "1".to_string(),
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: EventType::Info,
            timestamp: now,
            source: SourceRef {
                name: "test-source".to_string(),
                source_type: "test".to_string(),
            },
            decision: DecisionBody {
                status: DecisionStatus::Ok,
                reasons: vec![],
                confidence: 1.0,
            },
            metrics,
            baseline: BaselineSummary::default(),
            context: AgentContext {
                agent_id: agent_id.to_string(),
            },
        }
    }

    /// The exact bytes put on the wire
    pub fn canonical_json(&self) -> String {
        // Serialization of this type cannot fail: all keys are strings
        // and all values are serde-encodable.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Short digest of the canonical body, stored in the delivery log
    pub fn payload_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }
}

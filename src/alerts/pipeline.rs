//! Alert pipeline: reconcile a decision against stored alert state and
//! dispatch at most one payload per webhook target.
//!
//! Commit discipline: per target the pipeline computes the event, builds
//! and signs the payload, attempts delivery, then upserts alert state
//! regardless of the delivery outcome and appends a delivery record.
//! Receivers treat `event_id` as the idempotency key.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::delivery::{Deliverer, DeliveryClient};
use crate::config::{AlertingConfig, SourceConfig, WebhookConfig};
use crate::model::{
    AlertState, Decision, DecisionStatus, DeliveryRecord, EventType, WebhookPayload,
};
use crate::storage::{LedgerError, StateLedger};

/// Outcome for one target in one check
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub target: String,
    pub event_type: EventType,
    pub success: bool,
}

/// What the pipeline did for one decision
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub deliveries: Vec<TargetOutcome>,
    /// Populated in dry-run mode instead of delivering
    pub would_send: Vec<WebhookPayload>,
}

pub struct AlertPipeline {
    cooldown_minutes: i64,
    webhooks: Vec<WebhookConfig>,
    agent_id: String,
    ledger: Arc<dyn StateLedger>,
    deliverer: Box<dyn Deliverer>,
    dry_run: bool,
}

impl AlertPipeline {
    pub fn new(config: &AlertingConfig, agent_id: &str, ledger: Arc<dyn StateLedger>) -> Self {
        Self {
            cooldown_minutes: config.cooldown_minutes,
            webhooks: config.webhooks.clone(),
            agent_id: agent_id.to_string(),
            ledger,
            deliverer: Box::new(DeliveryClient::new()),
            dry_run: false,
        }
    }

    /// Swap the transport, e.g. for tests or a custom sender
    pub fn with_deliverer(mut self, deliverer: Box<dyn Deliverer>) -> Self {
        self.deliverer = deliverer;
        self
    }

    /// Compute and return payloads without delivering or mutating state
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reconcile one decision against every configured target
    pub async fn process(
        &self,
        source: &SourceConfig,
        decision: &Decision,
        now: DateTime<Utc>,
    ) -> Result<PipelineReport, LedgerError> {
        let mut report = PipelineReport::default();
        let current_hash = decision.reason_hash();

        for target in &self.webhooks {
            let stored = self.ledger.get_alert_state(&source.name, &target.name)?;
            let state = stored
                .clone()
                .unwrap_or_else(|| AlertState::sentinel(&source.name, &target.name, now));

            let Some(event_type) = next_event(&state, decision, &current_hash, now) else {
                tracing::debug!(
                    source = %source.name,
                    target = %target.name,
                    "no event: unchanged state or cooldown open"
                );
                self.ensure_state_row(stored.is_none(), &state)?;
                continue;
            };

            if !target.subscribes_to(event_type.as_str()) {
                tracing::debug!(
                    source = %source.name,
                    target = %target.name,
                    event = %event_type.as_str(),
                    "target not subscribed"
                );
                self.ensure_state_row(stored.is_none(), &state)?;
                continue;
            }

            let payload = WebhookPayload::for_decision(
                &source.name,
                &source.source_type,
                event_type,
                decision,
                &self.agent_id,
                now,
            );

            if self.dry_run {
                tracing::info!(
                    source = %source.name,
                    target = %target.name,
                    event = %event_type.as_str(),
                    "dry run: would send"
                );
                report.would_send.push(payload);
                continue;
            }

            let result = self.deliverer.deliver(&payload, target).await;

            // State advances even when delivery failed, so a receiver
            // outage cannot turn into an alert storm on recovery.
            let status_changed = state.notified_status != decision.status;
            let new_state = AlertState {
                source_name: source.name.clone(),
                target_name: target.name.clone(),
                notified_status: decision.status,
                notified_reason_hash: current_hash.clone(),
                last_change_at: if status_changed {
                    now
                } else {
                    state.last_change_at
                },
                last_sent_at: Some(now),
                cooldown_until: Some(now + Duration::minutes(self.cooldown_minutes)),
            };
            self.ledger.set_alert_state(&new_state)?;
            self.ledger.log_delivery(&DeliveryRecord::from_result(
                &source.name,
                &target.name,
                event_type,
                payload.payload_hash(),
                now,
                &result,
            ))?;

            if result.success {
                tracing::info!(
                    source = %source.name,
                    target = %target.name,
                    event = %event_type.as_str(),
                    status = ?result.status_code,
                    latency_ms = result.latency_ms,
                    "alert sent"
                );
            } else {
                tracing::warn!(
                    source = %source.name,
                    target = %target.name,
                    event = %event_type.as_str(),
                    attempts = result.attempts,
                    error = ?result.error,
                    "alert delivery failed"
                );
            }

            report.deliveries.push(TargetOutcome {
                target: target.name.clone(),
                event_type,
                success: result.success,
            });
        }

        Ok(report)
    }

    /// First evaluation of a pair persists the sentinel row, so exactly
    /// one state row exists per evaluated (source, target).
    fn ensure_state_row(&self, missing: bool, state: &AlertState) -> Result<(), LedgerError> {
        if missing && !self.dry_run {
            self.ledger.set_alert_state(state)?;
        }
        Ok(())
    }
}

/// The transition table. `Unknown` reads as "never notified".
fn next_event(
    state: &AlertState,
    decision: &Decision,
    current_hash: &str,
    now: DateTime<Utc>,
) -> Option<EventType> {
    use DecisionStatus as S;

    match (state.notified_status, decision.status) {
        (_, S::Unknown) => None,
        (S::Unknown | S::Ok, S::Ok) => None,
        (S::Unknown | S::Ok, S::Warning) => Some(EventType::Warning),
        (S::Unknown | S::Ok, S::Anomaly) => Some(EventType::Anomaly),
        (S::Warning, S::Anomaly) => Some(EventType::Anomaly),
        // Still degraded; do not downgrade noisily
        (S::Anomaly, S::Warning) => None,
        (S::Warning | S::Anomaly, S::Ok) => Some(EventType::Recovery),
        (S::Warning, S::Warning) | (S::Anomaly, S::Anomaly) => {
            if current_hash != state.notified_reason_hash && !state.is_cooling(now) {
                Some(match decision.status {
                    S::Anomaly => EventType::Anomaly,
                    _ => EventType::Warning,
                })
            } else {
                None
            }
        }
    }
}

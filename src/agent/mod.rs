//! Check orchestration: one probe through collect, ledger, baseline,
//! decision, and alerting

pub mod daemon;
pub mod health;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::alerts::{AlertPipeline, PipelineReport};
use crate::baseline;
use crate::collect::Collector;
use crate::config::{BaselineConfig, SourceConfig};
use crate::detect;
use crate::model::{Decision, Snapshot};
use crate::storage::{LedgerError, SnapshotQuery, StateLedger};

/// Everything one check produced
pub struct CheckOutcome {
    pub source: String,
    pub snapshot: Snapshot,
    pub decision: Decision,
    pub report: PipelineReport,
}

/// Runs one source through the full pipeline. Collector and delivery
/// failures are recovered locally; ledger failures abort the check.
pub struct CheckRunner {
    ledger: Arc<dyn StateLedger>,
    collector: Arc<dyn Collector>,
    baseline: BaselineConfig,
    pipeline: AlertPipeline,
}

impl CheckRunner {
    pub fn new(
        ledger: Arc<dyn StateLedger>,
        collector: Arc<dyn Collector>,
        baseline: BaselineConfig,
        pipeline: AlertPipeline,
    ) -> Self {
        Self {
            ledger,
            collector,
            baseline,
            pipeline,
        }
    }

    /// Collect, append, baseline, decide, alert
    pub async fn check_source(
        &self,
        source: &SourceConfig,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, LedgerError> {
        let snapshot = self.collector.collect(source, now);
        self.ledger.append_snapshot(&snapshot)?;

        let history = self.ledger.list_snapshots(
            &source.name,
            &SnapshotQuery {
                limit: self.baseline.window_size,
                max_age_days: self.baseline.max_age_days,
                success_only: true,
            },
        )?;
        let summary = baseline::calculate(&history, &self.baseline, now);
        let decision = detect::evaluate(&snapshot, &summary, source, now);

        tracing::info!(
            source = %source.name,
            status = %decision.status.as_str(),
            row_count = ?snapshot.row_count(),
            baseline_samples = summary.snapshot_count,
            "check complete"
        );

        let report = self.pipeline.process(source, &decision, now).await?;

        Ok(CheckOutcome {
            source: source.name.clone(),
            snapshot,
            decision,
            report,
        })
    }

    /// Whether the source's probe interval has elapsed since its last
    /// snapshot
    pub fn is_due(&self, source: &SourceConfig, now: DateTime<Utc>) -> Result<bool, LedgerError> {
        match self.ledger.get_last_snapshot(&source.name)? {
            None => Ok(true),
            Some(last) => {
                Ok(now >= last.collected_at + Duration::minutes(source.interval_minutes))
            }
        }
    }
}

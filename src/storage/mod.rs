//! Durable state ledger: snapshots, alert states, and the delivery log.
//!
//! The ledger is the only shared mutable resource in the agent; all
//! cross-check state goes through this interface. Implementations must
//! serialize writes per source and make `set_alert_state` atomic.

pub mod sqlite;

pub use sqlite::SqliteLedger;

use crate::model::{AlertState, DeliveryRecord, Snapshot};

/// Ledger errors. These surface to the caller: a check that cannot reach
/// its ledger aborts without mutating alert state.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Filters for reading snapshot history, applied before the limit
#[derive(Debug, Clone)]
pub struct SnapshotQuery {
    pub limit: usize,
    pub max_age_days: i64,
    pub success_only: bool,
}

impl Default for SnapshotQuery {
    fn default() -> Self {
        Self {
            limit: 20,
            max_age_days: 30,
            success_only: true,
        }
    }
}

impl SnapshotQuery {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_max_age_days(mut self, days: i64) -> Self {
        self.max_age_days = days;
        self
    }

    pub fn include_failures(mut self) -> Self {
        self.success_only = false;
        self
    }
}

/// Append-and-upsert store consumed by the check pipeline
pub trait StateLedger: Send + Sync {
    /// Durable append; returns the assigned id
    fn append_snapshot(&self, snapshot: &Snapshot) -> Result<i64, LedgerError>;

    /// Most recent snapshot for a source by collection instant
    fn get_last_snapshot(&self, source: &str) -> Result<Option<Snapshot>, LedgerError>;

    /// Recent snapshots, newest first
    fn list_snapshots(
        &self,
        source: &str,
        query: &SnapshotQuery,
    ) -> Result<Vec<Snapshot>, LedgerError>;

    fn get_alert_state(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Option<AlertState>, LedgerError>;

    /// Upsert keyed by (source, target); atomic
    fn set_alert_state(&self, state: &AlertState) -> Result<(), LedgerError>;

    /// Append-only delivery audit log
    fn log_delivery(&self, record: &DeliveryRecord) -> Result<(), LedgerError>;

    /// Delete snapshots older than the threshold while retaining at least
    /// `min_per_source` most recent successful snapshots per source.
    /// Old delivery log rows are trimmed with the same cutoff.
    fn purge_old_snapshots(
        &self,
        max_age_days: i64,
        min_per_source: usize,
    ) -> Result<usize, LedgerError>;

    fn schema_version(&self) -> Result<u32, LedgerError>;

    fn healthcheck(&self) -> bool;
}

//! Source collectors.
//!
//! A collector probes one configured source and always hands back a
//! `Snapshot`: failures are encoded as COLLECT_FAILED snapshots with the
//! error in metadata, never raised through the interface.

pub mod sqlite;

pub use sqlite::SqliteCollector;

use chrono::{DateTime, Utc};

use crate::config::SourceConfig;
use crate::model::Snapshot;

/// Probe a source into a snapshot. Implementations never error through
/// this interface.
pub trait Collector: Send + Sync {
    fn collect(&self, source: &SourceConfig, now: DateTime<Utc>) -> Snapshot;
}

/// Internal collection failures, converted into COLLECT_FAILED snapshots
/// at the trait boundary
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("probe timed out: {0}")]
    Timeout(String),

    #[error("invalid result: {0}")]
    Validation(String),
}

impl CollectError {
    /// Stable code stored in snapshot metadata
    pub fn code(&self) -> &'static str {
        match self {
            CollectError::Connection(_) => "connection_failed",
            CollectError::Query(_) => "query_failed",
            CollectError::Timeout(_) => "timeout",
            CollectError::Validation(_) => "validation_failed",
        }
    }
}

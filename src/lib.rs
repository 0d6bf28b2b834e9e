//! Driftwatch: Data-Quality Monitoring Agent
//!
//! A long-running agent that periodically probes SQL data sources,
//! decides whether each source is healthy against a learned behavioral
//! baseline, and dispatches signed webhook notifications on state
//! transitions. It catches the failures that complete "successfully":
//! jobs that leave data stale, missing, or anomalous.
//!
//! # Architecture
//!
//! - **Collector**: probes a source into a [`model::Snapshot`]; failures
//!   become `COLLECT_FAILED` snapshots, never errors
//! - **State Ledger**: durable store for snapshots, alert states, and
//!   the delivery log ([`storage::StateLedger`], SQLite reference
//!   implementation)
//! - **Baseline Calculator**: rolling statistics over recent successful
//!   snapshots ([`baseline::calculate`])
//! - **Decision Engine**: fixed-order rules producing a
//!   [`model::Decision`] ([`detect::evaluate`])
//! - **Alert Pipeline**: per-(source, target) state machine with
//!   deduplication and cooldown ([`alerts::AlertPipeline`])
//! - **Delivery Client**: HMAC-signed webhook POSTs with bounded retries
//!   ([`alerts::DeliveryClient`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use driftwatch::agent::CheckRunner;
//! use driftwatch::alerts::AlertPipeline;
//! use driftwatch::collect::SqliteCollector;
//! use driftwatch::config::Config;
//! use driftwatch::storage::SqliteLedger;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load("driftwatch.yaml".as_ref())?;
//! let ledger = Arc::new(SqliteLedger::open(&config.storage.path)?);
//! let pipeline = AlertPipeline::new(&config.alerting, &config.agent.id, ledger.clone());
//! let runner = CheckRunner::new(
//!     ledger,
//!     Arc::new(SqliteCollector::new()),
//!     config.baseline.clone(),
//!     pipeline,
//! );
//!
//! for source in &config.sources {
//!     let outcome = runner.check_source(source, Utc::now()).await?;
//!     println!("{}: {}", outcome.source, outcome.decision.status.as_str());
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod alerts;
pub mod baseline;
pub mod cli;
pub mod collect;
pub mod config;
pub mod detect;
pub mod model;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use model::{
    AlertState, BaselineSummary, CollectStatus, Decision, DecisionStatus, DeliveryRecord,
    DeliveryResult, EventType, MetricValue, Reason, Severity, Snapshot, WebhookPayload,
};
pub use storage::{SqliteLedger, StateLedger};

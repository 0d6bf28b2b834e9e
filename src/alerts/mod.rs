//! Alerting: the per-target state machine and webhook delivery

pub mod delivery;
pub mod pipeline;

pub use delivery::{Deliverer, DeliveryClient};
pub use pipeline::{AlertPipeline, PipelineReport, TargetOutcome};

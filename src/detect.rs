//! Decision engine: rule evaluation over a snapshot and its baseline.
//!
//! Rules run in a fixed order and all applicable rules contribute reasons;
//! the final status is the most severe reason's level. The engine is pure,
//! never errors, and never produces `Unknown`.

use chrono::{DateTime, Utc};

use crate::config::SourceConfig;
use crate::model::decision::codes;
use crate::model::{BaselineSummary, CollectStatus, Decision, DecisionStatus, Reason, Severity};
use crate::model::Snapshot;

/// Evaluate one snapshot against its baseline and source policy
pub fn evaluate(
    current: &Snapshot,
    baseline: &BaselineSummary,
    source: &SourceConfig,
    now: DateTime<Utc>,
) -> Decision {
    if current.collect_status == CollectStatus::CollectFailed {
        let message = format!(
            "failed to collect data: {}",
            current.error_message().unwrap_or("unknown error")
        );
        return Decision {
            status: DecisionStatus::Anomaly,
            reasons: vec![Reason::critical(codes::COLLECT_FAILED, message)],
            metrics: current.metrics.clone(),
            baseline: Some(baseline.clone()),
            confidence: confidence(baseline),
        };
    }

    let mut reasons = Vec::new();
    let row_count = current.row_count();
    let latest_timestamp = current.latest_timestamp();

    // Zero rows
    if row_count == Some(0) {
        reasons.push(
            Reason::critical(codes::VOLUME_ZERO, "row count is 0").with_detail("row_count", 0),
        );
    }

    // Minimum volume
    if let (Some(min), Some(rc)) = (source.volume.min_row_count, row_count) {
        if rc < min {
            reasons.push(
                Reason::critical(
                    codes::VOLUME_BELOW_MINIMUM,
                    format!("row count {rc} is below the minimum of {min}"),
                )
                .with_detail("row_count", rc)
                .with_detail("min_row_count", min),
            );
        }
    }

    // Hard freshness
    let mut hard_stale = false;
    if let (Some(max_age_hours), Some(ts)) = (source.freshness.max_age_hours, latest_timestamp) {
        let age_hours = seconds_between(ts, now) / 3600.0;
        if age_hours > max_age_hours {
            hard_stale = true;
            reasons.push(
                Reason::critical(
                    codes::DATA_STALE,
                    format!("data is {age_hours:.1}h old, exceeds max age of {max_age_hours}h"),
                )
                .with_detail("age_hours", age_hours)
                .with_detail("max_age_hours", max_age_hours),
            );
        }
    }

    // Volume deviation against the baseline
    if let (Some(median), Some(stddev), Some(rc)) = (
        baseline.row_count_median,
        baseline.row_count_stddev,
        row_count,
    ) {
        if stddev > 0.0 {
            let deviation = (rc as f64 - median).abs();
            let threshold = source.volume.deviation_factor * stddev;
            if deviation > threshold {
                reasons.push(
                    Reason::warning(
                        codes::VOLUME_DEVIATION,
                        format!(
                            "row count {rc} deviates from baseline median {median:.0} \
                             by more than {}x stddev",
                            source.volume.deviation_factor
                        ),
                    )
                    .with_detail("row_count", rc)
                    .with_detail("median", median)
                    .with_detail("stddev", stddev)
                    .with_detail("deviation_factor", source.volume.deviation_factor),
                );
            }
        }
    }

    // Interval freshness, unless the hard rule already flagged staleness
    if !hard_stale {
        if let (Some(interval), Some(ts)) =
            (baseline.expected_interval_seconds, latest_timestamp)
        {
            let age_seconds = seconds_between(ts, now);
            let threshold = source.freshness.factor * interval;
            if age_seconds > threshold {
                reasons.push(
                    Reason::warning(
                        codes::DATA_STALE,
                        format!(
                            "data is {:.1}h old, exceeds {}x the expected interval of {:.1}h",
                            age_seconds / 3600.0,
                            source.freshness.factor,
                            interval / 3600.0
                        ),
                    )
                    .with_detail("age_seconds", age_seconds)
                    .with_detail("expected_interval_seconds", interval)
                    .with_detail("factor", source.freshness.factor),
                );
            }
        }
    }

    Decision {
        status: status_of(&reasons),
        reasons,
        metrics: current.metrics.clone(),
        baseline: Some(baseline.clone()),
        confidence: confidence(baseline),
    }
}

fn status_of(reasons: &[Reason]) -> DecisionStatus {
    if reasons.iter().any(|r| r.severity == Severity::Critical) {
        DecisionStatus::Anomaly
    } else if reasons.iter().any(|r| r.severity == Severity::Warning) {
        DecisionStatus::Warning
    } else {
        DecisionStatus::Ok
    }
}

/// Step function over baseline size; informational only, never gates rules
fn confidence(baseline: &BaselineSummary) -> f64 {
    match baseline.snapshot_count {
        n if n >= 10 => 1.0,
        n if n >= 5 => 0.8,
        n if n >= 3 => 0.5,
        _ => 0.3,
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::config::{FreshnessConfig, VolumeConfig};
    use crate::model::MetricValue;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    fn source(freshness: FreshnessConfig, volume: VolumeConfig) -> SourceConfig {
        let mut source = SourceConfig::example("orders");
        source.freshness = freshness;
        source.volume = volume;
        source
    }

    fn snap(row_count: Option<i64>, latest: Option<DateTime<Utc>>) -> Snapshot {
        let mut metrics = BTreeMap::new();
        if let Some(rc) = row_count {
            metrics.insert("row_count".to_string(), MetricValue::Int(rc));
        }
        if let Some(ts) = latest {
            metrics.insert("latest_timestamp".to_string(), MetricValue::from(ts));
        }
        Snapshot::success("orders", now(), metrics)
    }

    fn healthy_baseline() -> BaselineSummary {
        BaselineSummary {
            snapshot_count: 20,
            row_count_median: Some(1000.0),
            row_count_min: Some(980.0),
            row_count_max: Some(1020.0),
            row_count_stddev: Some(12.0),
            expected_interval_seconds: Some(6.0 * 3600.0),
            oldest_snapshot_at: Some(now() - Duration::days(5)),
            newest_snapshot_at: Some(now() - Duration::hours(6)),
        }
    }

    fn reason_codes(decision: &Decision) -> Vec<&str> {
        decision.reasons.iter().map(|r| r.code.as_str()).collect()
    }

    #[test]
    fn test_cold_start_zero_rows() {
        let current = snap(Some(0), Some(now()));
        let policy = source(
            FreshnessConfig::default(),
            VolumeConfig {
                min_row_count: Some(100),
                deviation_factor: 3.0,
            },
        );
        let decision = evaluate(&current, &BaselineSummary::default(), &policy, now());

        assert_eq!(decision.status, DecisionStatus::Anomaly);
        assert_eq!(
            reason_codes(&decision),
            vec![codes::VOLUME_ZERO, codes::VOLUME_BELOW_MINIMUM]
        );
        assert_eq!(decision.confidence, 0.3);
    }

    #[test]
    fn test_healthy_with_baseline() {
        let current = snap(Some(1003), Some(now() - Duration::hours(1)));
        let policy = source(FreshnessConfig::default(), VolumeConfig::default());
        let decision = evaluate(&current, &healthy_baseline(), &policy, now());

        assert_eq!(decision.status, DecisionStatus::Ok);
        assert!(decision.reasons.is_empty());
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_volume_deviation_warning() {
        let current = snap(Some(1500), Some(now() - Duration::hours(1)));
        let policy = source(FreshnessConfig::default(), VolumeConfig::default());
        let decision = evaluate(&current, &healthy_baseline(), &policy, now());

        assert_eq!(decision.status, DecisionStatus::Warning);
        assert_eq!(reason_codes(&decision), vec![codes::VOLUME_DEVIATION]);
    }

    #[test]
    fn test_hard_freshness_anomaly() {
        let current = snap(Some(1000), Some(now() - Duration::hours(10)));
        let policy = source(
            FreshnessConfig {
                max_age_hours: Some(8.0),
                factor: 2.0,
            },
            VolumeConfig::default(),
        );
        let decision = evaluate(&current, &healthy_baseline(), &policy, now());

        assert_eq!(decision.status, DecisionStatus::Anomaly);
        // The interval rule stays silent once the hard rule flagged staleness
        assert_eq!(reason_codes(&decision), vec![codes::DATA_STALE]);
        assert_eq!(decision.reasons[0].severity, Severity::Critical);
    }

    #[test]
    fn test_interval_freshness_warning() {
        let current = snap(Some(1000), Some(now() - Duration::hours(13)));
        let policy = source(FreshnessConfig::default(), VolumeConfig::default());
        let decision = evaluate(&current, &healthy_baseline(), &policy, now());

        // 13h > 2.0 x 6h
        assert_eq!(decision.status, DecisionStatus::Warning);
        assert_eq!(reason_codes(&decision), vec![codes::DATA_STALE]);
        assert_eq!(decision.reasons[0].severity, Severity::Warning);
    }

    #[test]
    fn test_collect_failed_short_circuits() {
        let current = Snapshot::failed("orders", now(), "connection_failed", "refused");
        let policy = source(
            FreshnessConfig {
                max_age_hours: Some(1.0),
                factor: 2.0,
            },
            VolumeConfig {
                min_row_count: Some(100),
                deviation_factor: 3.0,
            },
        );
        let decision = evaluate(&current, &healthy_baseline(), &policy, now());

        assert_eq!(decision.status, DecisionStatus::Anomaly);
        assert_eq!(reason_codes(&decision), vec![codes::COLLECT_FAILED]);
        assert_eq!(decision.confidence, 1.0);
    }

    #[test]
    fn test_zero_stddev_suppresses_deviation() {
        let mut baseline = healthy_baseline();
        baseline.row_count_stddev = Some(0.0);
        let current = snap(Some(5000), Some(now() - Duration::hours(1)));
        let policy = source(FreshnessConfig::default(), VolumeConfig::default());
        let decision = evaluate(&current, &baseline, &policy, now());

        assert_eq!(decision.status, DecisionStatus::Ok);
    }

    #[test]
    fn test_null_latest_timestamp_suppresses_freshness() {
        let current = snap(Some(1000), None);
        let policy = source(
            FreshnessConfig {
                max_age_hours: Some(1.0),
                factor: 2.0,
            },
            VolumeConfig::default(),
        );
        let decision = evaluate(&current, &healthy_baseline(), &policy, now());

        assert_eq!(decision.status, DecisionStatus::Ok);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn test_zero_rows_without_minimum() {
        let current = snap(Some(0), Some(now() - Duration::hours(1)));
        let policy = source(FreshnessConfig::default(), VolumeConfig::default());
        let decision = evaluate(&current, &BaselineSummary::default(), &policy, now());

        assert_eq!(decision.status, DecisionStatus::Anomaly);
        assert_eq!(reason_codes(&decision), vec![codes::VOLUME_ZERO]);
    }

    #[test]
    fn test_deviation_exactly_at_threshold_is_ok() {
        // |1036 - 1000| = 36 = 3.0 x 12: strict inequality, no reason
        let current = snap(Some(1036), Some(now() - Duration::hours(1)));
        let policy = source(FreshnessConfig::default(), VolumeConfig::default());
        let decision = evaluate(&current, &healthy_baseline(), &policy, now());

        assert_eq!(decision.status, DecisionStatus::Ok);
    }

    #[test]
    fn test_age_exactly_at_max_is_ok() {
        let current = snap(Some(1000), Some(now() - Duration::hours(8)));
        let policy = source(
            FreshnessConfig {
                max_age_hours: Some(8.0),
                factor: 10.0,
            },
            VolumeConfig::default(),
        );
        let decision = evaluate(&current, &healthy_baseline(), &policy, now());

        assert_eq!(decision.status, DecisionStatus::Ok);
    }

    #[test]
    fn test_missing_row_count_on_success_is_ok() {
        let current = snap(None, None);
        let policy = source(
            FreshnessConfig::default(),
            VolumeConfig {
                min_row_count: Some(10),
                deviation_factor: 3.0,
            },
        );
        let decision = evaluate(&current, &healthy_baseline(), &policy, now());
        assert_eq!(decision.status, DecisionStatus::Ok);
    }

    #[test]
    fn test_determinism() {
        let current = snap(Some(1500), Some(now() - Duration::hours(20)));
        let policy = source(
            FreshnessConfig {
                max_age_hours: Some(8.0),
                factor: 2.0,
            },
            VolumeConfig {
                min_row_count: Some(2000),
                deviation_factor: 3.0,
            },
        );
        let a = evaluate(&current, &healthy_baseline(), &policy, now());
        let b = evaluate(&current, &healthy_baseline(), &policy, now());
        assert_eq!(a, b);
        assert_eq!(a.reason_hash(), b.reason_hash());
    }

    #[test]
    fn test_confidence_steps() {
        let current = snap(Some(1000), None);
        let policy = source(FreshnessConfig::default(), VolumeConfig::default());
        for (count, expected) in [(0, 0.3), (2, 0.3), (3, 0.5), (5, 0.8), (9, 0.8), (10, 1.0)] {
            let baseline = BaselineSummary {
                snapshot_count: count,
                ..BaselineSummary::default()
            };
            let decision = evaluate(&current, &baseline, &policy, now());
            assert_eq!(decision.confidence, expected, "count {count}");
        }
    }
}

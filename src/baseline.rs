//! Rolling baseline statistics over recent successful snapshots

use chrono::{DateTime, Duration, Utc};

use crate::config::BaselineConfig;
use crate::model::{BaselineSummary, Snapshot};

/// Summarize a source's history into a baseline.
///
/// Input order does not matter; only SUCCESS snapshots with a row count,
/// no older than `max_age_days`, contribute, and of those only the most
/// recent `window_size`. Pure and deterministic for a given `now`.
pub fn calculate(
    snapshots: &[Snapshot],
    config: &BaselineConfig,
    now: DateTime<Utc>,
) -> BaselineSummary {
    let cutoff = now - Duration::days(config.max_age_days);

    let mut selected: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| s.is_success() && s.row_count().is_some() && s.collected_at >= cutoff)
        .collect();
    selected.sort_by_key(|s| s.collected_at);

    if selected.len() > config.window_size {
        selected.drain(..selected.len() - config.window_size);
    }

    if selected.is_empty() {
        return BaselineSummary::default();
    }

    let counts: Vec<f64> = selected
        .iter()
        .filter_map(|s| s.row_count().map(|c| c as f64))
        .collect();

    let mut sorted_counts = counts.clone();
    sorted_counts.sort_by(|a, b| a.total_cmp(b));

    let row_count_median = median(&sorted_counts);
    let row_count_min = sorted_counts.first().copied();
    let row_count_max = sorted_counts.last().copied();
    let row_count_stddev = population_stddev(&counts);

    let mut intervals: Vec<f64> = selected
        .windows(2)
        .map(|pair| {
            (pair[1].collected_at - pair[0].collected_at).num_milliseconds() as f64 / 1000.0
        })
        .filter(|delta| *delta > 0.0)
        .collect();
    intervals.sort_by(|a, b| a.total_cmp(b));
    let expected_interval_seconds = median(&intervals);

    BaselineSummary {
        snapshot_count: selected.len(),
        row_count_median,
        row_count_min,
        row_count_max,
        row_count_stddev,
        expected_interval_seconds,
        oldest_snapshot_at: selected.first().map(|s| s.collected_at),
        newest_snapshot_at: selected.last().map(|s| s.collected_at),
    }
}

/// Linear-interpolation median of an ascending-sorted slice
fn median(sorted: &[f64]) -> Option<f64> {
    match sorted.len() {
        0 => None,
        n if n % 2 == 1 => Some(sorted[n / 2]),
        n => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

/// Population standard deviation; null below two samples
fn population_stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}

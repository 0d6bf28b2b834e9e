//! SQLite dialect collector.
//!
//! Opens the configured database read-only, runs the probe query, and
//! extracts the metric contract: a required `row_count` column (`count`
//! accepted as an alias), an optional `latest_timestamp` column
//! (`max_timestamp` accepted), and any extra numeric columns as
//! additional metrics.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OpenFlags};

use super::{CollectError, Collector};
use crate::config::SourceConfig;
use crate::model::{rfc3339z, MetricValue, Snapshot};

pub struct SqliteCollector;

impl SqliteCollector {
    pub fn new() -> Self {
        Self
    }

    fn probe(
        &self,
        source: &SourceConfig,
    ) -> Result<BTreeMap<String, MetricValue>, CollectError> {
        if source.dialect != "sqlite" {
            return Err(CollectError::Validation(format!(
                "unsupported dialect: {}",
                source.dialect
            )));
        }

        let path = source
            .connection
            .strip_prefix("sqlite://")
            .unwrap_or(&source.connection);

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| CollectError::Connection(truncate(&e.to_string())))?;

        conn.busy_timeout(Duration::from_secs(source.timeout_seconds))
            .map_err(|e| CollectError::Connection(truncate(&e.to_string())))?;

        let mut stmt = conn
            .prepare(&source.query)
            .map_err(|e| map_query_error(&e))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query([]).map_err(|e| map_query_error(&e))?;
        let row = rows
            .next()
            .map_err(|e| map_query_error(&e))?
            .ok_or_else(|| CollectError::Query("query returned no rows".to_string()))?;

        let mut values = Vec::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            let value: SqlValue = row
                .get(i)
                .map_err(|e| CollectError::Query(truncate(&e.to_string())))?;
            values.push((name.clone(), value));
        }

        extract_metrics(&values)
    }
}

impl Default for SqliteCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SqliteCollector {
    fn collect(&self, source: &SourceConfig, now: DateTime<Utc>) -> Snapshot {
        let started = Instant::now();
        let snapshot = match self.probe(source) {
            Ok(metrics) => Snapshot::success(&source.name, now, metrics),
            Err(e) => {
                tracing::warn!(
                    source = %source.name,
                    code = %e.code(),
                    "collection failed: {}",
                    e
                );
                Snapshot::failed(&source.name, now, e.code(), &truncate(&e.to_string()))
            }
        };
        snapshot
            .with_metadata(
                "duration_ms",
                MetricValue::Int(started.elapsed().as_millis() as i64),
            )
            .with_metadata("connector_type", MetricValue::from("sql"))
            .with_metadata("dialect", MetricValue::from(source.dialect.as_str()))
    }
}

fn map_query_error(e: &rusqlite::Error) -> CollectError {
    if let rusqlite::Error::SqliteFailure(inner, _) = e {
        if inner.code == ErrorCode::DatabaseBusy || inner.code == ErrorCode::DatabaseLocked {
            return CollectError::Timeout(truncate(&e.to_string()));
        }
    }
    CollectError::Query(truncate(&e.to_string()))
}

fn extract_metrics(
    row: &[(String, SqlValue)],
) -> Result<BTreeMap<String, MetricValue>, CollectError> {
    let mut metrics = BTreeMap::new();

    let count_col = find_column(row, &["row_count", "count"], "count");
    let (count_name, count_value) = count_col.ok_or_else(|| {
        CollectError::Validation(
            "query must return a row_count column; use SELECT COUNT(*) AS row_count, ..."
                .to_string(),
        )
    })?;
    let row_count = to_row_count(count_value)?;
    metrics.insert("row_count".to_string(), MetricValue::Int(row_count));

    let ts_col = find_column(row, &["latest_timestamp", "max_timestamp"], "timestamp");
    let ts_name = ts_col.map(|(name, value)| {
        if let Some(ts) = to_timestamp(value) {
            metrics.insert("latest_timestamp".to_string(), MetricValue::Timestamp(ts));
        }
        name
    });

    for (name, value) in row {
        if name.as_str() == count_name || Some(name.as_str()) == ts_name.as_deref() {
            continue;
        }
        match value {
            SqlValue::Integer(v) => {
                metrics.insert(name.clone(), MetricValue::Int(*v));
            }
            SqlValue::Real(v) => {
                metrics.insert(name.clone(), MetricValue::Float(*v));
            }
            _ => {}
        }
    }

    Ok(metrics)
}

/// Exact alias match first, then any column whose name contains the hint
fn find_column<'a>(
    row: &'a [(String, SqlValue)],
    aliases: &[&str],
    hint: &str,
) -> Option<(&'a str, &'a SqlValue)> {
    for alias in aliases {
        if let Some((name, value)) = row.iter().find(|(name, _)| name == alias) {
            return Some((name.as_str(), value));
        }
    }
    row.iter()
        .find(|(name, _)| name.to_lowercase().contains(hint))
        .map(|(name, value)| (name.as_str(), value))
}

fn to_row_count(value: &SqlValue) -> Result<i64, CollectError> {
    let count = match value {
        SqlValue::Integer(v) => *v,
        SqlValue::Real(v) => *v as i64,
        SqlValue::Text(s) => s
            .trim()
            .replace(',', "")
            .parse::<i64>()
            .map_err(|_| CollectError::Validation(format!("row_count is not numeric: {s:?}")))?,
        SqlValue::Null => 0,
        SqlValue::Blob(_) => {
            return Err(CollectError::Validation(
                "row_count is not numeric".to_string(),
            ))
        }
    };
    if count < 0 {
        return Err(CollectError::Validation(format!(
            "row_count must be non-negative, got {count}"
        )));
    }
    Ok(count)
}

fn to_timestamp(value: &SqlValue) -> Option<DateTime<Utc>> {
    match value {
        SqlValue::Integer(epoch) => Utc.timestamp_opt(*epoch, 0).single(),
        SqlValue::Text(s) => rfc3339z::parse(s).or_else(|| {
            // sqlite's datetime() format
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        }),
        _ => None,
    }
}

fn truncate(message: &str) -> String {
    const MAX: usize = 500;
    if message.len() <= MAX {
        message.to_string()
    } else {
        let cut = message
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(MAX);
        message[..cut].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CollectStatus;

    fn seeded_db() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, created_at TEXT NOT NULL);
             INSERT INTO orders (created_at) VALUES
                 ('2024-01-15 08:00:00'),
                 ('2024-01-15 09:00:00'),
                 ('2024-01-15 09:30:00');",
        )
        .unwrap();
        let path = path.to_string_lossy().to_string();
        (dir, path)
    }

    fn source_with(connection: &str, query: &str) -> SourceConfig {
        let mut source = SourceConfig::example("orders");
        source.connection = connection.to_string();
        source.query = query.to_string();
        source
    }

    #[test]
    fn test_collect_success() {
        let (_dir, path) = seeded_db();
        let source = source_with(
            &path,
            "SELECT COUNT(*) AS row_count, MAX(created_at) AS latest_timestamp FROM orders",
        );
        let now = Utc::now();
        let snapshot = SqliteCollector::new().collect(&source, now);

        assert_eq!(snapshot.collect_status, CollectStatus::Success);
        assert_eq!(snapshot.collected_at, now);
        assert_eq!(snapshot.row_count(), Some(3));
        assert_eq!(
            snapshot.latest_timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap())
        );
        assert!(snapshot.metadata.contains_key("duration_ms"));
    }

    #[test]
    fn test_count_alias_and_extra_metrics() {
        let (_dir, path) = seeded_db();
        let source = source_with(
            &path,
            "SELECT COUNT(*) AS count, 12.5 AS avg_amount FROM orders",
        );
        let snapshot = SqliteCollector::new().collect(&source, Utc::now());

        assert_eq!(snapshot.row_count(), Some(3));
        assert_eq!(
            snapshot.metrics.get("avg_amount"),
            Some(&MetricValue::Float(12.5))
        );
    }

    #[test]
    fn test_missing_row_count_is_validation_failure() {
        let (_dir, path) = seeded_db();
        let source = source_with(&path, "SELECT MAX(created_at) AS newest FROM orders");
        let snapshot = SqliteCollector::new().collect(&source, Utc::now());

        assert_eq!(snapshot.collect_status, CollectStatus::CollectFailed);
        assert_eq!(
            snapshot.metadata.get("error_code"),
            Some(&MetricValue::from("validation_failed"))
        );
        assert_eq!(snapshot.row_count(), None);
    }

    #[test]
    fn test_unreachable_database_is_connection_failure() {
        let source = source_with("/nonexistent/nowhere.db", "SELECT 1 AS row_count");
        let snapshot = SqliteCollector::new().collect(&source, Utc::now());

        assert_eq!(snapshot.collect_status, CollectStatus::CollectFailed);
        assert_eq!(
            snapshot.metadata.get("error_code"),
            Some(&MetricValue::from("connection_failed"))
        );
    }

    #[test]
    fn test_bad_sql_is_query_failure() {
        let (_dir, path) = seeded_db();
        let source = source_with(&path, "SELECT FROM nothing");
        let snapshot = SqliteCollector::new().collect(&source, Utc::now());

        assert_eq!(snapshot.collect_status, CollectStatus::CollectFailed);
        assert_eq!(
            snapshot.metadata.get("error_code"),
            Some(&MetricValue::from("query_failed"))
        );
    }

    #[test]
    fn test_unsupported_dialect_rejected() {
        let (_dir, path) = seeded_db();
        let mut source = source_with(&path, "SELECT COUNT(*) AS row_count FROM orders");
        source.dialect = "postgres".to_string();
        let snapshot = SqliteCollector::new().collect(&source, Utc::now());

        assert_eq!(snapshot.collect_status, CollectStatus::CollectFailed);
        assert_eq!(
            snapshot.metadata.get("error_code"),
            Some(&MetricValue::from("validation_failed"))
        );
    }

    #[test]
    fn test_negative_row_count_rejected() {
        let (_dir, path) = seeded_db();
        let source = source_with(&path, "SELECT -5 AS row_count");
        let snapshot = SqliteCollector::new().collect(&source, Utc::now());

        assert_eq!(snapshot.collect_status, CollectStatus::CollectFailed);
        assert_eq!(
            snapshot.metadata.get("error_code"),
            Some(&MetricValue::from("validation_failed"))
        );
    }

    #[test]
    fn test_epoch_timestamp_column() {
        let (_dir, path) = seeded_db();
        let source = source_with(
            &path,
            "SELECT COUNT(*) AS row_count, 1705312800 AS latest_timestamp FROM orders",
        );
        let snapshot = SqliteCollector::new().collect(&source, Utc::now());
        assert_eq!(
            snapshot.latest_timestamp(),
            Some(Utc.timestamp_opt(1_705_312_800, 0).single().unwrap())
        );
    }
}

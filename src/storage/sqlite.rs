//! SQLite-backed ledger: single writer connection, WAL journal,
//! versioned schema

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{LedgerError, SnapshotQuery, StateLedger};
use crate::model::{
    rfc3339z, AlertState, CollectStatus, DecisionStatus, DeliveryRecord, MetricValue, Snapshot,
};

const SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL,
    collected_at TEXT NOT NULL,
    collect_status TEXT NOT NULL,
    row_count INTEGER,
    latest_timestamp TEXT,
    metrics_json TEXT NOT NULL,
    metadata_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_source_time
    ON snapshots(source_name, collected_at DESC);
CREATE INDEX IF NOT EXISTS idx_snapshots_source_status_time
    ON snapshots(source_name, collect_status, collected_at DESC);

CREATE TABLE IF NOT EXISTS alert_state (
    source_name TEXT NOT NULL,
    target_name TEXT NOT NULL,
    notified_status TEXT NOT NULL,
    notified_reason_hash TEXT NOT NULL,
    last_change_at TEXT NOT NULL,
    last_sent_at TEXT,
    cooldown_until TEXT,
    PRIMARY KEY (source_name, target_name)
);

CREATE TABLE IF NOT EXISTS deliveries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL,
    target_name TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    sent_at TEXT NOT NULL,
    success INTEGER NOT NULL,
    status_code INTEGER,
    latency_ms INTEGER,
    error_message TEXT,
    attempts INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_deliveries_source_time
    ON deliveries(source_name, sent_at DESC);
";

/// Reference ledger implementation. One connection guarded by a mutex:
/// writes are serialized process-wide, which satisfies the per-source
/// requirement.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (and create) the database at `path`, applying migrations
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory ledger for tests
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.migrate()?;
        Ok(ledger)
    }

    /// Apply pending schema migrations
    pub fn migrate(&self) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        if current_version(&conn)? == 0 {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_meta (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, rfc3339z::to_string(&Utc::now())],
            )?;
        }
        Ok(())
    }
}

fn current_version(conn: &Connection) -> Result<u32, LedgerError> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_meta'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Ok(0);
    }
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_meta", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    rfc3339z::parse(raw).ok_or_else(|| LedgerError::Corrupt(format!("bad timestamp: {raw}")))
}

fn metrics_from_json(raw: &str) -> Result<BTreeMap<String, MetricValue>, LedgerError> {
    serde_json::from_str(raw).map_err(|e| LedgerError::Corrupt(format!("bad metric json: {e}")))
}

fn row_to_snapshot(row: &Row<'_>) -> Result<Snapshot, LedgerError> {
    let collected_at: String = row.get("collected_at")?;
    let status: String = row.get("collect_status")?;
    let metrics_json: String = row.get("metrics_json")?;
    let metadata_json: String = row.get("metadata_json")?;

    Ok(Snapshot {
        id: Some(row.get("id")?),
        source_name: row.get("source_name")?,
        collected_at: parse_ts(&collected_at)?,
        collect_status: CollectStatus::parse(&status)
            .ok_or_else(|| LedgerError::Corrupt(format!("bad collect status: {status}")))?,
        metrics: metrics_from_json(&metrics_json)?,
        metadata: metrics_from_json(&metadata_json)?,
    })
}

fn row_to_alert_state(row: &Row<'_>) -> Result<AlertState, LedgerError> {
    let status: String = row.get("notified_status")?;
    let last_change_at: String = row.get("last_change_at")?;
    let last_sent_at: Option<String> = row.get("last_sent_at")?;
    let cooldown_until: Option<String> = row.get("cooldown_until")?;

    Ok(AlertState {
        source_name: row.get("source_name")?,
        target_name: row.get("target_name")?,
        notified_status: DecisionStatus::parse(&status)
            .ok_or_else(|| LedgerError::Corrupt(format!("bad notified status: {status}")))?,
        notified_reason_hash: row.get("notified_reason_hash")?,
        last_change_at: parse_ts(&last_change_at)?,
        last_sent_at: last_sent_at.as_deref().map(parse_ts).transpose()?,
        cooldown_until: cooldown_until.as_deref().map(parse_ts).transpose()?,
    })
}

impl StateLedger for SqliteLedger {
    fn append_snapshot(&self, snapshot: &Snapshot) -> Result<i64, LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO snapshots (
                source_name, collected_at, collect_status, row_count,
                latest_timestamp, metrics_json, metadata_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.source_name,
                rfc3339z::to_string(&snapshot.collected_at),
                snapshot.collect_status.as_str(),
                snapshot.row_count(),
                snapshot.latest_timestamp().map(|ts| rfc3339z::to_string(&ts)),
                serde_json::to_string(&snapshot.metrics)
                    .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
                serde_json::to_string(&snapshot.metadata)
                    .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_last_snapshot(&self, source: &str) -> Result<Option<Snapshot>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM snapshots
             WHERE source_name = ?1
             ORDER BY collected_at DESC, id DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query(params![source])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_snapshot(row)?)),
            None => Ok(None),
        }
    }

    fn list_snapshots(
        &self,
        source: &str,
        query: &SnapshotQuery,
    ) -> Result<Vec<Snapshot>, LedgerError> {
        let cutoff = Utc::now() - Duration::days(query.max_age_days);
        let conn = self.conn.lock();

        let sql = if query.success_only {
            "SELECT * FROM snapshots
             WHERE source_name = ?1 AND collected_at >= ?2 AND collect_status = 'SUCCESS'
             ORDER BY collected_at DESC, id DESC
             LIMIT ?3"
        } else {
            "SELECT * FROM snapshots
             WHERE source_name = ?1 AND collected_at >= ?2
             ORDER BY collected_at DESC, id DESC
             LIMIT ?3"
        };

        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params![
            source,
            rfc3339z::to_string(&cutoff),
            query.limit as i64
        ])?;

        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            snapshots.push(row_to_snapshot(row)?);
        }
        Ok(snapshots)
    }

    fn get_alert_state(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Option<AlertState>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM alert_state WHERE source_name = ?1 AND target_name = ?2",
        )?;
        let mut rows = stmt.query(params![source, target])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_alert_state(row)?)),
            None => Ok(None),
        }
    }

    fn set_alert_state(&self, state: &AlertState) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO alert_state (
                source_name, target_name, notified_status, notified_reason_hash,
                last_change_at, last_sent_at, cooldown_until
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                state.source_name,
                state.target_name,
                state.notified_status.as_str(),
                state.notified_reason_hash,
                rfc3339z::to_string(&state.last_change_at),
                state.last_sent_at.map(|ts| rfc3339z::to_string(&ts)),
                state.cooldown_until.map(|ts| rfc3339z::to_string(&ts)),
            ],
        )?;
        Ok(())
    }

    fn log_delivery(&self, record: &DeliveryRecord) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO deliveries (
                source_name, target_name, event_type, payload_hash, sent_at,
                success, status_code, latency_ms, error_message, attempts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.source_name,
                record.target_name,
                record.event_type.as_str(),
                record.payload_hash,
                rfc3339z::to_string(&record.sent_at),
                record.success,
                record.status_code,
                record.latency_ms,
                record.error_message,
                record.attempts,
            ],
        )?;
        Ok(())
    }

    fn purge_old_snapshots(
        &self,
        max_age_days: i64,
        min_per_source: usize,
    ) -> Result<usize, LedgerError> {
        let cutoff = rfc3339z::to_string(&(Utc::now() - Duration::days(max_age_days)));
        let conn = self.conn.lock();

        let sources: Vec<String> = {
            let mut stmt = conn.prepare("SELECT DISTINCT source_name FROM snapshots")?;
            let mut rows = stmt.query([])?;
            let mut names = Vec::new();
            while let Some(row) = rows.next()? {
                names.push(row.get(0)?);
            }
            names
        };

        let mut deleted = 0;
        for source in sources {
            deleted += conn.execute(
                "DELETE FROM snapshots
                 WHERE source_name = ?1
                   AND collected_at < ?2
                   AND id NOT IN (
                       SELECT id FROM snapshots
                       WHERE source_name = ?1 AND collect_status = 'SUCCESS'
                       ORDER BY collected_at DESC
                       LIMIT ?3
                   )",
                params![source, cutoff, min_per_source as i64],
            )?;
        }

        deleted += conn.execute("DELETE FROM deliveries WHERE sent_at < ?1", params![cutoff])?;

        Ok(deleted)
    }

    fn schema_version(&self) -> Result<u32, LedgerError> {
        let conn = self.conn.lock();
        current_version(&conn)
    }

    fn healthcheck(&self) -> bool {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::EventType;

    fn ledger() -> SqliteLedger {
        SqliteLedger::open_in_memory().unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    fn snap_at(collected_at: DateTime<Utc>, row_count: i64) -> Snapshot {
        let mut metrics = BTreeMap::new();
        metrics.insert("row_count".to_string(), MetricValue::Int(row_count));
        metrics.insert(
            "latest_timestamp".to_string(),
            MetricValue::from(collected_at),
        );
        Snapshot::success("orders", collected_at, metrics)
            .with_metadata("duration_ms", MetricValue::Int(12))
    }

    #[test]
    fn test_append_and_read_back() {
        let ledger = ledger();
        let id = ledger.append_snapshot(&snap_at(at(6), 100)).unwrap();
        assert!(id > 0);

        let back = ledger.get_last_snapshot("orders").unwrap().unwrap();
        assert_eq!(back.id, Some(id));
        assert_eq!(back.row_count(), Some(100));
        assert_eq!(back.latest_timestamp(), Some(at(6)));
        assert_eq!(back.collected_at, at(6));
        assert_eq!(
            back.metadata.get("duration_ms"),
            Some(&MetricValue::Int(12))
        );
    }

    #[test]
    fn test_ids_are_monotonic() {
        let ledger = ledger();
        let a = ledger.append_snapshot(&snap_at(at(6), 1)).unwrap();
        let b = ledger.append_snapshot(&snap_at(at(7), 2)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_last_snapshot_by_collection_instant() {
        let ledger = ledger();
        ledger.append_snapshot(&snap_at(at(8), 200)).unwrap();
        // Older probe appended later still loses
        ledger.append_snapshot(&snap_at(at(6), 100)).unwrap();

        let last = ledger.get_last_snapshot("orders").unwrap().unwrap();
        assert_eq!(last.row_count(), Some(200));
    }

    #[test]
    fn test_list_filters_and_limit() {
        let ledger = ledger();
        let now = Utc::now();
        for i in 0..5 {
            ledger
                .append_snapshot(&snap_at(now - Duration::hours(6 * (i + 1)), 100 + i))
                .unwrap();
        }
        let failed = Snapshot::failed("orders", now - Duration::hours(1), "timeout", "timed out");
        ledger.append_snapshot(&failed).unwrap();

        let successes = ledger
            .list_snapshots("orders", &SnapshotQuery::default())
            .unwrap();
        assert_eq!(successes.len(), 5);
        assert!(successes.iter().all(|s| s.is_success()));
        // Newest first
        assert_eq!(successes[0].row_count(), Some(100));

        let limited = ledger
            .list_snapshots("orders", &SnapshotQuery::default().with_limit(2))
            .unwrap();
        assert_eq!(limited.len(), 2);

        let with_failures = ledger
            .list_snapshots("orders", &SnapshotQuery::default().include_failures())
            .unwrap();
        assert_eq!(with_failures.len(), 6);
        assert!(!with_failures[0].is_success());
    }

    #[test]
    fn test_alert_state_upsert() {
        let ledger = ledger();
        assert!(ledger.get_alert_state("orders", "ops").unwrap().is_none());

        let mut state = AlertState::sentinel("orders", "ops", at(6));
        ledger.set_alert_state(&state).unwrap();
        let back = ledger.get_alert_state("orders", "ops").unwrap().unwrap();
        assert_eq!(back, state);

        state.notified_status = DecisionStatus::Anomaly;
        state.notified_reason_hash = "deadbeefdeadbeef".to_string();
        state.last_sent_at = Some(at(7));
        state.cooldown_until = Some(at(8));
        ledger.set_alert_state(&state).unwrap();

        let back = ledger.get_alert_state("orders", "ops").unwrap().unwrap();
        assert_eq!(back.notified_status, DecisionStatus::Anomaly);
        assert_eq!(back.last_sent_at, Some(at(7)));
        assert_eq!(back.cooldown_until, Some(at(8)));
    }

    #[test]
    fn test_log_delivery() {
        let ledger = ledger();
        let record = DeliveryRecord {
            id: None,
            source_name: "orders".to_string(),
            target_name: "ops".to_string(),
            event_type: EventType::Anomaly,
            payload_hash: "cafe0123cafe0123".to_string(),
            sent_at: at(6),
            success: false,
            status_code: Some(503),
            latency_ms: Some(420),
            error_message: Some("HTTP 503".to_string()),
            attempts: 4,
        };
        ledger.log_delivery(&record).unwrap();

        let conn = ledger.conn.lock();
        let (event, success, attempts): (String, bool, u32) = conn
            .query_row(
                "SELECT event_type, success, attempts FROM deliveries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(event, "anomaly");
        assert!(!success);
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_purge_keeps_recent_successes() {
        let ledger = ledger();
        let now = Utc::now();
        // Three old successes, one old failure, one fresh success
        for i in 0..3 {
            ledger
                .append_snapshot(&snap_at(now - Duration::days(60 + i), 100))
                .unwrap();
        }
        let old_failure =
            Snapshot::failed("orders", now - Duration::days(45), "timeout", "timed out");
        ledger.append_snapshot(&old_failure).unwrap();
        ledger
            .append_snapshot(&snap_at(now - Duration::hours(1), 500))
            .unwrap();

        // Retention floor of 2 successes: one old success and the old
        // failure go
        let deleted = ledger.purge_old_snapshots(30, 2).unwrap();
        assert_eq!(deleted, 3);

        let remaining = ledger
            .list_snapshots(
                "orders",
                &SnapshotQuery::default()
                    .with_max_age_days(365)
                    .include_failures(),
            )
            .unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|s| s.is_success()));
    }

    #[test]
    fn test_purge_under_floor_is_a_noop() {
        let ledger = ledger();
        let now = Utc::now();
        ledger
            .append_snapshot(&snap_at(now - Duration::days(90), 100))
            .unwrap();
        let deleted = ledger.purge_old_snapshots(30, 10).unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn test_schema_version_and_health() {
        let ledger = ledger();
        assert_eq!(ledger.schema_version().unwrap(), 1);
        assert!(ledger.healthcheck());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let ledger = SqliteLedger::open(&path).unwrap();
        assert!(ledger.healthcheck());
        assert!(path.exists());
    }
}

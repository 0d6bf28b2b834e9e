//! CLI command implementations.
//!
//! Exit codes: 0 all healthy, 1 runtime or config error (surfaced as
//! `anyhow::Error` by the binary), 2 at least one source degraded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::agent::daemon::Daemon;
use crate::agent::health::{self, HealthState};
use crate::agent::{CheckOutcome, CheckRunner};
use crate::alerts::{AlertPipeline, Deliverer, DeliveryClient};
use crate::baseline;
use crate::collect::SqliteCollector;
use crate::config::{self, Config};
use crate::model::{rfc3339z, WebhookPayload};
use crate::storage::{SnapshotQuery, SqliteLedger, StateLedger};

/// Idempotent logging setup; `RUST_LOG` wins over the configured level
pub fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("driftwatch={level}").into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    config::find_config_file()
        .context("no config file found; run `driftwatch init` to create one")
}

fn load(explicit: Option<&Path>, verbose: bool) -> Result<Config> {
    let path = resolve_config_path(explicit)?;
    let config = Config::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    init_logging(if verbose { "debug" } else { &config.agent.log_level });
    Ok(config)
}

fn open_ledger(config: &Config) -> Result<Arc<SqliteLedger>> {
    let ledger = SqliteLedger::open(&config.storage.path).with_context(|| {
        format!("failed to open ledger at {}", config.storage.path.display())
    })?;
    Ok(Arc::new(ledger))
}

fn build_runner(config: &Config, ledger: Arc<SqliteLedger>, dry_run: bool) -> CheckRunner {
    let pipeline = AlertPipeline::new(&config.alerting, &config.agent.id, ledger.clone())
        .with_dry_run(dry_run);
    CheckRunner::new(
        ledger,
        Arc::new(SqliteCollector::new()),
        config.baseline.clone(),
        pipeline,
    )
}

/// `driftwatch check`
pub async fn check(
    config_path: Option<&Path>,
    source_filter: Option<&str>,
    force: bool,
    dry_run: bool,
    json: bool,
    verbose: bool,
) -> Result<i32> {
    let config = load(config_path, verbose)?;
    let ledger = open_ledger(&config)?;
    let runner = build_runner(&config, ledger, dry_run);

    let sources: Vec<_> = match source_filter {
        Some(name) => {
            let Some(source) = config.source(name) else {
                bail!("source not found: {name}");
            };
            vec![source.clone()]
        }
        None => config.sources.clone(),
    };

    let now = Utc::now();
    let mut outcomes = Vec::new();
    let mut degraded = false;

    for source in &sources {
        if !source.enabled {
            continue;
        }
        if !force && !runner.is_due(source, now)? {
            tracing::debug!(source = %source.name, "not due yet");
            continue;
        }

        let outcome = runner.check_source(source, now).await?;
        if outcome.decision.status.is_degraded() {
            degraded = true;
        }
        outcomes.push(outcome);
    }

    if json {
        print_check_json(&outcomes)?;
    } else {
        print_check_human(&outcomes, dry_run);
    }

    Ok(if degraded { 2 } else { 0 })
}

fn print_check_json(outcomes: &[CheckOutcome]) -> Result<()> {
    let results: Vec<_> = outcomes
        .iter()
        .map(|o| {
            serde_json::json!({
                "source": o.source,
                "status": o.decision.status,
                "metrics": o.snapshot.metrics,
                "reasons": o.decision.reasons,
                "confidence": o.decision.confidence,
                "deliveries": o.report.deliveries.iter().map(|d| {
                    serde_json::json!({
                        "target": d.target,
                        "event": d.event_type,
                        "success": d.success,
                    })
                }).collect::<Vec<_>>(),
            })
        })
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({ "results": results }))?
    );
    Ok(())
}

fn print_check_human(outcomes: &[CheckOutcome], dry_run: bool) {
    if outcomes.is_empty() {
        println!("No sources checked");
        return;
    }

    println!("Checked {} source(s)\n", outcomes.len());
    for outcome in outcomes {
        println!("{}  {}", outcome.source, outcome.decision.status.as_str());
        if let Some(rc) = outcome.snapshot.row_count() {
            println!("  row count: {rc}");
        }
        if let Some(ts) = outcome.snapshot.latest_timestamp() {
            println!("  latest data: {}", rfc3339z::to_string(&ts));
        }
        for reason in &outcome.decision.reasons {
            println!("  -> {}", reason.message);
        }
        if dry_run {
            for payload in &outcome.report.would_send {
                println!("  would send {}", payload.event_type.as_str());
            }
        } else {
            for delivery in &outcome.report.deliveries {
                if delivery.success {
                    println!("  sent {} to {}", delivery.event_type.as_str(), delivery.target);
                } else {
                    println!(
                        "  failed to send {} to {}",
                        delivery.event_type.as_str(),
                        delivery.target
                    );
                }
            }
        }
        println!();
    }

    let ok = outcomes
        .iter()
        .filter(|o| !o.decision.status.is_degraded())
        .count();
    let warn = outcomes
        .iter()
        .filter(|o| o.decision.status == crate::model::DecisionStatus::Warning)
        .count();
    let anomaly = outcomes
        .iter()
        .filter(|o| o.decision.status == crate::model::DecisionStatus::Anomaly)
        .count();
    let mut summary = format!("Summary: {ok} OK");
    if warn > 0 {
        summary.push_str(&format!(", {warn} WARNING"));
    }
    if anomaly > 0 {
        summary.push_str(&format!(", {anomaly} ANOMALY"));
    }
    println!("{summary}");
}

/// `driftwatch daemon`
pub async fn daemon(
    config_path: Option<&Path>,
    health_port: Option<u16>,
    verbose: bool,
) -> Result<i32> {
    let config = load(config_path, verbose)?;
    let ledger = open_ledger(&config)?;
    let runner = Arc::new(build_runner(&config, ledger.clone(), false));

    println!("driftwatch agent starting");
    println!("  agent id: {}", config.agent.id);
    println!("  sources: {}", config.sources.len());
    println!("  webhooks: {}", config.alerting.webhooks.len());

    let mut daemon = Daemon::new(runner, config.sources.clone());
    let handle = daemon.start();

    let health_handle = health_port.map(|port| {
        let state = HealthState {
            agent_id: config.agent.id.clone(),
            source_count: config.sources.len(),
            ledger: ledger.clone() as Arc<dyn StateLedger>,
        };
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, state).await {
                tracing::error!(error = %e, "health endpoint failed");
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    println!("\nshutting down");

    daemon.stop().await;
    let _ = handle.await;
    if let Some(health_handle) = health_handle {
        health_handle.abort();
    }

    Ok(0)
}

/// `driftwatch status`
pub fn status(config_path: Option<&Path>, json: bool, verbose: bool) -> Result<i32> {
    let config = load(config_path, verbose)?;
    let ledger = open_ledger(&config)?;

    let mut rows = Vec::new();
    for source in &config.sources {
        let last = ledger.get_last_snapshot(&source.name)?;
        rows.push(serde_json::json!({
            "source": source.name,
            "last_check": last.as_ref().map(|s| rfc3339z::to_string(&s.collected_at)),
            "status": last.as_ref().map(|s| s.collect_status.as_str()).unwrap_or("NEVER_CHECKED"),
            "row_count": last.as_ref().and_then(|s| s.row_count()),
            "enabled": source.enabled,
        }));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!(
            "{:<24} {:<28} {:<16} {:>12}  enabled",
            "source", "last check", "status", "row count"
        );
        for row in &rows {
            println!(
                "{:<24} {:<28} {:<16} {:>12}  {}",
                row["source"].as_str().unwrap_or("-"),
                row["last_check"].as_str().unwrap_or("-"),
                row["status"].as_str().unwrap_or("-"),
                row["row_count"]
                    .as_u64()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                if row["enabled"].as_bool().unwrap_or(false) { "yes" } else { "no" },
            );
        }
    }

    Ok(0)
}

/// `driftwatch history <source>`
pub fn history(
    config_path: Option<&Path>,
    source: &str,
    limit: usize,
    json: bool,
    verbose: bool,
) -> Result<i32> {
    let config = load(config_path, verbose)?;
    let ledger = open_ledger(&config)?;

    let snapshots = ledger.list_snapshots(
        source,
        &SnapshotQuery::default()
            .with_limit(limit)
            .with_max_age_days(365)
            .include_failures(),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(0);
    }

    if snapshots.is_empty() {
        println!("no history for source: {source}");
        return Ok(0);
    }

    println!("{:<28} {:<16} {:>12}  latest data", "time", "status", "row count");
    for snapshot in &snapshots {
        println!(
            "{:<28} {:<16} {:>12}  {}",
            rfc3339z::to_string(&snapshot.collected_at),
            snapshot.collect_status.as_str(),
            snapshot
                .row_count()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            snapshot
                .latest_timestamp()
                .map(|ts| rfc3339z::to_string(&ts))
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    Ok(0)
}

/// `driftwatch explain <source>`
pub fn explain(config_path: Option<&Path>, source: &str, json: bool, verbose: bool) -> Result<i32> {
    let config = load(config_path, verbose)?;
    let Some(source_config) = config.source(source) else {
        bail!("source not found: {source}");
    };
    let ledger = open_ledger(&config)?;

    let history = ledger.list_snapshots(
        source,
        &SnapshotQuery {
            limit: config.baseline.window_size,
            max_age_days: config.baseline.max_age_days,
            success_only: true,
        },
    )?;
    let summary = baseline::calculate(&history, &config.baseline, Utc::now());

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "source": source,
                "config": {
                    "freshness": source_config.freshness,
                    "volume": source_config.volume,
                    "interval_minutes": source_config.interval_minutes,
                },
                "baseline": summary,
            }))?
        );
        return Ok(0);
    }

    println!("source: {source}");
    println!("  connection: {}", config::mask_secrets(&source_config.connection));
    println!("  interval: {}m", source_config.interval_minutes);
    println!(
        "  freshness max age: {}",
        source_config
            .freshness
            .max_age_hours
            .map(|h| format!("{h}h"))
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "  volume minimum: {}",
        source_config
            .volume
            .min_row_count
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  deviation factor: {}", source_config.volume.deviation_factor);

    println!("\nbaseline ({} snapshots):", summary.snapshot_count);
    if summary.snapshot_count == 0 {
        println!("  no baseline data yet");
        return Ok(0);
    }
    if let (Some(median), Some(min), Some(max)) = (
        summary.row_count_median,
        summary.row_count_min,
        summary.row_count_max,
    ) {
        println!("  row count median: {median:.0}");
        println!("  row count range: {min:.0} - {max:.0}");
    }
    if let Some(stddev) = summary.row_count_stddev {
        println!("  row count stddev: {stddev:.1}");
    }
    if let Some(interval) = summary.expected_interval_seconds {
        println!("  expected interval: {:.1}h", interval / 3600.0);
    }

    Ok(0)
}

/// `driftwatch test-webhook`
pub async fn test_webhook(
    config_path: Option<&Path>,
    target_filter: Option<&str>,
    verbose: bool,
) -> Result<i32> {
    let config = load(config_path, verbose)?;

    let webhooks: Vec<_> = match target_filter {
        Some(name) => {
            let found: Vec<_> = config
                .alerting
                .webhooks
                .iter()
                .filter(|w| w.name == name)
                .cloned()
                .collect();
            if found.is_empty() {
                bail!("webhook not found: {name}");
            }
            found
        }
        None => config.alerting.webhooks.clone(),
    };

    if webhooks.is_empty() {
        println!("no webhooks configured");
        return Ok(0);
    }

    let client = DeliveryClient::new();
    for webhook in &webhooks {
        println!("testing webhook: {}", webhook.name);
        let payload = WebhookPayload::test_payload(&config.agent.id, Utc::now());
        let result = client.deliver(&payload, webhook).await;
        if result.success {
            println!(
                "  ok (status: {}, latency: {}ms)",
                result.status_code.unwrap_or(0),
                result.latency_ms
            );
        } else {
            println!(
                "  failed: {} (attempts: {})",
                result.error.as_deref().unwrap_or("unknown"),
                result.attempts
            );
        }
    }

    Ok(0)
}

/// `driftwatch purge`
pub fn purge(config_path: Option<&Path>, dry_run: bool, verbose: bool) -> Result<i32> {
    let config = load(config_path, verbose)?;

    if dry_run {
        println!("dry run: would delete snapshots older than {} days", config.retention.days);
        println!("  keeping at least {} per source", config.retention.min_snapshots);
        return Ok(0);
    }

    let ledger = open_ledger(&config)?;
    let deleted =
        ledger.purge_old_snapshots(config.retention.days, config.retention.min_snapshots)?;
    println!("purged {deleted} old records");

    Ok(0)
}

/// `driftwatch migrate`
pub fn migrate(config_path: Option<&Path>, verbose: bool) -> Result<i32> {
    let config = load(config_path, verbose)?;
    let ledger = open_ledger(&config)?;
    println!("ledger schema version: {}", ledger.schema_version()?);
    Ok(0)
}

/// `driftwatch init`
pub fn init(config_path: Option<&Path>, force: bool) -> Result<i32> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("./driftwatch.yaml"));

    if path.exists() && !force {
        bail!("{} already exists; use --force to overwrite", path.display());
    }

    std::fs::write(&path, Config::example())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote example config to {}", path.display());
    println!("edit it, export the referenced environment variables, then run `driftwatch check`");

    Ok(0)
}

//! Background daemon: a one-minute tick running due sources sequentially

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::interval;

use super::CheckRunner;
use crate::config::SourceConfig;

const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Periodic check loop with graceful shutdown.
///
/// Each tick walks the configured sources in order, probing those whose
/// interval has elapsed. At most one check runs per source at a time;
/// sources are processed sequentially within a tick.
pub struct Daemon {
    runner: Arc<CheckRunner>,
    sources: Vec<SourceConfig>,
    tick: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl Daemon {
    pub fn new(runner: Arc<CheckRunner>, sources: Vec<SourceConfig>) -> Self {
        Self {
            runner,
            sources,
            tick: DEFAULT_TICK,
            shutdown_tx: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Start the loop on the runtime
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let runner = Arc::clone(&self.runner);
        let sources = self.sources.clone();
        let tick = self.tick;

        tokio::spawn(async move {
            tracing::info!(sources = sources.len(), "daemon started");
            let mut ticker = interval(tick);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_due_checks(&runner, &sources).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("daemon shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the loop to stop after the current check
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

async fn run_due_checks(runner: &Arc<CheckRunner>, sources: &[SourceConfig]) {
    let now = Utc::now();

    for source in sources {
        if !source.enabled {
            continue;
        }

        match runner.is_due(source, now) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::error!(source = %source.name, error = %e, "due-check failed");
                continue;
            }
        }

        if let Err(e) = runner.check_source(source, now).await {
            tracing::error!(source = %source.name, error = %e, "check failed");
        }
    }
}

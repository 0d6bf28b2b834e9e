//! Daemon health endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::storage::StateLedger;

#[derive(Clone)]
pub struct HealthState {
    pub agent_id: String,
    pub source_count: usize,
    pub ledger: Arc<dyn StateLedger>,
}

/// Serve `GET /healthz` until the daemon exits
pub async fn serve(port: u16, state: HealthState) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health endpoint listening");
    axum::serve(listener, app).await
}

async fn healthz(State(state): State<HealthState>) -> impl IntoResponse {
    let healthy = state.ledger.healthcheck();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "ok" } else { "degraded" },
            "agent_id": state.agent_id,
            "sources": state.source_count,
        })),
    )
}

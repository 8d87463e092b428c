//! Operational HTTP endpoints: liveness and Prometheus exposition.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use omnia_domain::config::ServerConfig;
use omnia_domain::error::{Error, Result};

use crate::metrics::MetricsRecorder;

/// Serve `/healthz` and `/metrics` until the token is cancelled.
pub async fn serve(
    cfg: &ServerConfig,
    metrics: Arc<MetricsRecorder>,
    cancel: CancellationToken,
) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(export_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Other(format!("binding {addr}: {e}")))?;
    tracing::info!(%addr, "metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::Other(format!("metrics server: {e}")))
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn export_metrics(State(metrics): State<Arc<MetricsRecorder>>) -> impl IntoResponse {
    match metrics.export() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "metrics exposition failed");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

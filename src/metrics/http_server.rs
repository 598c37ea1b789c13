//! HTTP exporter for metrics and status.
//!
//! Provides:
//! - `/metrics` - Prometheus metrics
//! - `/health` - Health check (liveness probe)
//! - `/status` - Scheduler status snapshot

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::PathMetrics;
use crate::types::ScheduleState;

/// Supplies the `/status` snapshot; the scheduler implements this.
pub trait StatusSource: Send + Sync {
    fn schedule_state(&self) -> ScheduleState;
}

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct MetricsServerState {
    pub metrics: Arc<PathMetrics>,
    pub status: Arc<dyn StatusSource>,
    pub start_time: Instant,
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    uptime_seconds: u64,
    scheduler: ScheduleState,
}

/// Serve the exporter until `cancel` fires.
pub async fn serve_metrics(
    addr: SocketAddr,
    metrics: Arc<PathMetrics>,
    status: Arc<dyn StatusSource>,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let state = MetricsServerState {
        metrics,
        status,
        start_time: Instant::now(),
    };

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    info!(%addr, "starting metrics HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// Root handler - returns service info.
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "wanpulse",
        "version": crate::VERSION,
        "endpoints": ["/metrics", "/health", "/status"]
    }))
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<MetricsServerState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        state.metrics.gather(),
    )
}

/// Health handler - liveness only; the process serving requests is healthy.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Status handler - scheduler snapshot plus uptime.
async fn status_handler(State(state): State<MetricsServerState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: crate::VERSION,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        scheduler: state.status.schedule_state(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FixedStatus;

    impl StatusSource for FixedStatus {
        fn schedule_state(&self) -> ScheduleState {
            ScheduleState {
                enabled: true,
                schedule: "0 * * * *".into(),
                running: true,
                sweep_in_flight: false,
                last_run: Some(Utc::now()),
                next_run: None,
            }
        }
    }

    #[test]
    fn test_status_response_serialization() {
        let response = StatusResponse {
            version: crate::VERSION,
            uptime_seconds: 12,
            scheduler: FixedStatus.schedule_state(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"uptime_seconds\":12"));
        assert!(json.contains("\"running\":true"));
    }
}

//! Dashboard and operational HTTP API
//!
//! Read-only endpoints joining identity rows with live samples, plus the
//! health and Prometheus exposition routes. The ingestion route is
//! mounted on the same router with its own state.

mod list;
mod live;

use crate::buffer::RingWindow;
use crate::health::{HealthMonitor, PipelineStatus};
use crate::ingest::{self, IdResolver, IngestState};
use crate::observability::ConsumerMetrics;
use crate::store::IdentityStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use rusqlite::ToSql;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for the dashboard routes.
pub struct AppState {
    pub identity: Arc<IdentityStore>,
    pub ring: Arc<RingWindow>,
    pub health: HealthMonitor,
    pub metrics: ConsumerMetrics,
}

/// Build the full consumer router: ingestion, dashboard reads, and
/// operational endpoints.
pub fn router(state: AppState, resolver: Arc<dyn IdResolver>) -> Router {
    let ingest_state = Arc::new(IngestState {
        ring: state.ring.clone(),
        resolver,
        metrics: state.metrics.clone(),
    });
    let state = Arc::new(state);

    let ingest_routes = Router::new()
        .route("/api/v1/ingest", post(ingest::handle_ingest))
        .with_state(ingest_state);

    let dashboard_routes = Router::new()
        .route("/api/v1/nodes", get(list::nodes))
        .route("/api/v1/namespaces", get(list::namespaces))
        .route("/api/v1/deployments", get(list::deployments))
        .route("/api/v1/pods", get(list::pods))
        .route("/api/v1/pvcs", get(list::pvcs))
        .route("/api/v1/metrics/live", get(live::live_metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state);

    ingest_routes.merge(dashboard_routes)
}

/// Start the HTTP server; stops when shutdown is signalled.
pub async fn serve(
    port: u16,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

/// Liveness probe. A degraded pipeline (recent flush failures) still
/// serves traffic; only a failing flush path reports 503.
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.health.snapshot();

    let status_code = if snapshot.status == PipelineStatus::Failing {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(snapshot))
}

/// Readiness probe, gating traffic until startup has completed and the
/// flush path is not failing.
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness();

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return internal_error(anyhow::anyhow!("failed to encode metrics: {e}"));
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Parse an integer filter parameter; malformed values are treated as
/// absent.
pub(crate) fn query_id(params: &HashMap<String, String>, key: &str) -> Option<i64> {
    params.get(key).and_then(|value| value.parse().ok())
}

/// Borrow a filter-argument vector as a rusqlite parameter slice.
pub(crate) fn sql_params(args: &[i64]) -> Vec<&dyn ToSql> {
    args.iter().map(|arg| arg as &dyn ToSql).collect()
}

pub(crate) fn internal_error(err: anyhow::Error) -> Response {
    error!(error = %err, "Query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_parses_integers() {
        let mut params = HashMap::new();
        params.insert("node".to_string(), "42".to_string());
        params.insert("pod".to_string(), "abc".to_string());

        assert_eq!(query_id(&params, "node"), Some(42));
        // Malformed values are treated as absent.
        assert_eq!(query_id(&params, "pod"), None);
        assert_eq!(query_id(&params, "deployment"), None);
    }
}

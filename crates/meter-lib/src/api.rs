//! Operational HTTP surface of the meter
//!
//! - `/healthz`: every component (`engine`, `pricer`, `sinks`). A degraded
//!   pricer or sink is still live, only an unhealthy component fails the probe.
//! - `/healthz/:component`: a single component, 404 when it is not tracked
//! - `/readyz`: ready once the pipeline is wired and running
//! - `/metrics`: the `cost_meter_*` Prometheus registry

use crate::health::{ComponentStatus, HealthRegistry};
use crate::observability::MeterMetrics;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{info, warn};

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// State shared by the handlers
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: MeterMetrics,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: MeterMetrics) -> Self {
        Self {
            health_registry,
            metrics,
        }
    }
}

fn liveness_code(status: ComponentStatus) -> StatusCode {
    if status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    (liveness_code(health.status), Json(health))
}

async fn component_health(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.health_registry.component(&name).await {
        Some(health) => (liveness_code(health.status), Json(health)).into_response(),
        None => (StatusCode::NOT_FOUND, format!("unknown component {}\n", name)).into_response(),
    }
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode meter metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", TEXT_CONTENT_TYPE)],
            Vec::new(),
        );
    }
    (StatusCode::OK, [("content-type", TEXT_CONTENT_TYPE)], buffer)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/healthz/:component", get(component_health))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the router on `0.0.0.0:<port>` until the task is aborted
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Meter API listening");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

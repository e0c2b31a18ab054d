//! Admin HTTP API
//!
//! - `GET/POST/DELETE /masters`: read or mutate the supervised master set
//! - `GET /status`: leadership, registry view and per-master health
//! - `GET /health/live`: liveness probe
//! - `GET /metrics`: Prometheus text
//!
//! Mutations are accepted only on the leader; followers answer 503 with the
//! `NotLeader` error so callers can retry elsewhere.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use super::masters::MastersRegistry;
use super::monitor::HealthMonitor;
use crate::common::{Error, METRICS};

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<MastersRegistry>,
    pub monitor: Arc<HealthMonitor>,
    pub check_interval: Duration,
    pub barrier_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct MastersRequest {
    pub masters: Vec<String>,
}

pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/masters",
            get(get_masters).post(add_masters).delete(remove_masters),
        )
        .route("/status", get(status))
        .route("/health/live", get(health_live))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(e: Error) -> Response {
    (e.to_http_status(), Json(json!({ "error": e.to_string() }))).into_response()
}

async fn get_masters(State(state): State<AdminState>) -> impl IntoResponse {
    Json(json!({ "masters": state.registry.get_masters() }))
}

async fn add_masters(
    State(state): State<AdminState>,
    Json(req): Json<MastersRequest>,
) -> Response {
    let result: crate::common::Result<()> = async {
        state.registry.add_masters(&req.masters).await?;
        state.registry.barrier(state.barrier_timeout).await
    }
    .await;
    match result {
        Ok(()) => Json(json!({ "masters": state.registry.get_masters() })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn remove_masters(
    State(state): State<AdminState>,
    Json(req): Json<MastersRequest>,
) -> Response {
    let result: crate::common::Result<()> = async {
        state.registry.remove_masters(&req.masters).await?;
        state.registry.barrier(state.barrier_timeout).await
    }
    .await;
    match result {
        Ok(()) => Json(json!({ "masters": state.registry.get_masters() })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn status(State(state): State<AdminState>) -> impl IntoResponse {
    Json(json!({
        "is_leader": state.registry.is_leader(),
        "masters": state.registry.get_masters(),
        "health": state.monitor.health(),
        "monitoring": state.monitor.is_running(),
        "check_interval_ms": state.check_interval.as_millis() as u64,
    }))
}

async fn health_live() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "alive": true,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": METRICS.uptime_seconds(),
        })),
    )
}

async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}

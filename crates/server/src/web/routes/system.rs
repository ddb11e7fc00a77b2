//! Service routes: build info, health checks and metrics

use crate::state::AppState;
use crate::web::types::{BuildInfo, StatusResponse};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use vmctl_common::prelude::{Error, Result};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/info", get(info))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
}

#[utoipa::path(
    get,
    path = "/info",
    tags = ["System"],
    responses((status = 200, body = BuildInfo, description = "Build identifiers"))
)]
async fn info() -> Json<BuildInfo> {
    Json(BuildInfo::current())
}

/// Liveness check, answers as long as the process serves requests.
///
#[utoipa::path(
    get,
    path = "/healthz",
    tags = ["System"],
    responses((status = 200, body = StatusResponse, description = "Alive"))
)]
async fn healthz() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

/// Readiness check, ready while the vCenter session is alive.
///
#[utoipa::path(
    get,
    path = "/readyz",
    tags = ["System"],
    responses(
        (status = 200, body = StatusResponse, description = "Ready"),
        (status = 503, body = String, description = "vCenter session lost")
    )
)]
async fn readyz(State(app_state): State<AppState>) -> Result<Json<StatusResponse>> {
    match app_state.vsphere.session_alive().await {
        Ok(true) => Ok(Json(StatusResponse::ok())),
        Ok(false) => Err(Error::NotReady("vCenter session lost".to_owned())),
        Err(error) => {
            tracing::warn!(target: "handler", ?error, "Readiness check failed");
            Err(Error::NotReady(error.to_string()))
        }
    }
}

#[utoipa::path(
    get,
    path = "/metrics",
    tags = ["System"],
    responses((status = 200, body = String, description = "Prometheus text exposition"))
)]
async fn metrics(State(app_state): State<AppState>) -> Result<impl IntoResponse> {
    let body = app_state.metrics.render()?;

    Ok(([(CONTENT_TYPE, METRICS_CONTENT_TYPE)], body))
}

use crate::state::AppState;
use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Logs every request and records its duration, labelled by the matched
/// route. Scrapes of `/metrics` are not recorded.
///
/// # Arguments
///
/// * `State(app_state)`: Shared application state holding the collectors.
/// * `request`: Incoming request.
/// * `next`: `Next` middleware in the chain.
///
pub async fn track(
    State(app_state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();
    tracing::info!(target: "handler", %method, %uri, status = status.as_u16(), elapsed = ?elapsed, "Request served");
    if path != "/metrics" {
        app_state.metrics.observe_request(
            method.as_str(),
            &path,
            status.as_u16(),
            elapsed.as_secs_f64(),
        );
    }

    response
}

/// Configures CORS for browser clients of the API.
///
pub fn allow_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
}

//! System endpoints: health check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::app_state::AppState;
use crate::error::RelayError;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    connections: usize,
}

/// `GET /api/health` — Service health status and live connection count.
///
/// # Errors
///
/// Returns [`RelayError::HubUnavailable`] (503) if the hub does not answer.
pub async fn health_handler(State(state): State<AppState>) -> Result<impl IntoResponse, RelayError> {
    let connections = state.hub.client_count().await?;
    Ok((
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now().to_rfc3339(),
            connections,
        }),
    ))
}

/// System routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}

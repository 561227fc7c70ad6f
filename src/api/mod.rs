//! REST API layer: route handlers and router composition.
//!
//! All endpoints are mounted under `/api`.

pub mod handlers;

use axum::Router;

use crate::app_state::AppState;

/// Builds the REST API router.
pub fn build_router() -> Router<AppState> {
    Router::new().nest("/api", handlers::routes())
}

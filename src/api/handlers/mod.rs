//! REST endpoint handlers.

pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all REST routes mounted under `/api`.
pub fn routes() -> Router<AppState> {
    Router::new().merge(system::routes())
}

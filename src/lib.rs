//! # tictactoe-relay
//!
//! Realtime WebSocket relay for the tic-tac-toe game backend.
//!
//! Every connection upgraded at `/ws` is registered with a single
//! [`Hub`](domain::Hub) task that owns the set of live clients. Frames a
//! client sends are relayed to every other client; a `hello` frame is
//! answered with a `welcome` on the same connection only. Slow consumers
//! are disconnected instead of buffering without bound.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── WS Handler (ws/handler)      ── upgrade, register
//!     │     ├── reader pump            ── decode, hello → welcome, relay
//!     │     └── writer pump            ── drain queue, keepalive pings
//!     ├── Health endpoint (api/)
//!     │
//!     └── Hub (domain/)                ── registry owner, fan-out
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod ws;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the full application router: REST API, `/ws` and HTTP layers.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

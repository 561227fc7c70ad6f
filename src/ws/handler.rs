//! Axum WebSocket upgrade handler.

use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;

use super::connection::attach;
use crate::app_state::AppState;
use crate::config::ConnectionSettings;
use crate::domain::Hub;

/// `GET /ws` — Upgrade HTTP connection to WebSocket and attach it to the hub.
///
/// A failed handshake is logged and answered with the framework's
/// rejection; nothing is registered.
pub async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "websocket handshake rejected");
            return rejection.into_response();
        }
    };

    let settings = state.connection;
    let hub = state.hub;
    ws.max_message_size(settings.max_message_size)
        .max_frame_size(settings.max_message_size)
        .on_failed_upgrade(|error| tracing::warn!(%error, "websocket upgrade failed"))
        .on_upgrade(move |socket| serve_connection(socket, hub, settings))
}

/// Turns an upgraded socket into a managed connection on `hub`.
///
/// Returns once the client is registered and both pumps are running.
pub async fn serve_connection(socket: WebSocket, hub: Hub, settings: ConnectionSettings) {
    let (sink, stream) = socket.split();
    attach(sink, stream, hub, settings).await;
}

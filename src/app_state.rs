//! Shared application state injected into all Axum handlers.

use crate::config::ConnectionSettings;
use crate::domain::Hub;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the connection hub.
    pub hub: Hub,
    /// Limits applied to every new WebSocket connection.
    pub connection: ConnectionSettings,
}

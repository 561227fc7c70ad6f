//! tictactoe-relay server entry point.
//!
//! Starts the connection hub and the Axum HTTP server with the health and
//! WebSocket endpoints.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use tictactoe_relay::app_state::AppState;
use tictactoe_relay::build_app;
use tictactoe_relay::config::RelayConfig;
use tictactoe_relay::domain::Hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = RelayConfig::from_env().context("loading configuration")?;

    // Initialize tracing
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, "starting tictactoe-relay");

    // The hub must be running before the first request is served
    let hub = Hub::start(config.hub_mailbox_capacity);

    let app = build_app(AppState {
        hub,
        connection: config.connection,
    });

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Per-connection timing and sizing
//! limits are grouped in [`ConnectionSettings`].

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::error::RelayError;

/// Default per-client outbound queue capacity (frames).
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;
/// Default deadline for writing one frame to the peer.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
/// Default read liveness window; refreshed on every read and pong.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1025;
/// Default capacity of the hub mailbox.
pub const DEFAULT_HUB_MAILBOX_CAPACITY: usize = 1024;
/// Shortest accepted write deadline or liveness window.
pub const MIN_WAIT: Duration = Duration::from_secs(1);
/// Longest accepted write deadline or liveness window.
pub const MAX_WAIT: Duration = Duration::from_secs(86_400);

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,

    /// Verbose logging when no `RUST_LOG` filter is given.
    pub debug: bool,

    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,

    /// Capacity of the hub command mailbox.
    pub hub_mailbox_capacity: usize,

    /// Per-connection limits and deadlines.
    pub connection: ConnectionSettings,
}

/// Timing and sizing limits applied to every WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Capacity of each client's outbound queue.
    pub send_queue_capacity: usize,
    /// Deadline for each outbound frame write.
    pub write_wait: Duration,
    /// Read liveness window.
    pub pong_wait: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ConnectionSettings {
    /// Keepalive ping period: nine tenths of the liveness window, so a
    /// healthy peer's pong always lands before the read deadline.
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        self.pong_wait - self.pong_wait / 10
    }

    /// Checks that deadlines lie within [`MIN_WAIT`]..=[`MAX_WAIT`] and the
    /// outbound queue can hold at least one frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), RelayError> {
        check_wait("write wait", self.write_wait)?;
        check_wait("pong wait", self.pong_wait)?;
        if self.send_queue_capacity == 0 {
            return Err(RelayError::Config(
                "send queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_wait(name: &str, wait: Duration) -> Result<(), RelayError> {
    if (MIN_WAIT..=MAX_WAIT).contains(&wait) {
        Ok(())
    } else {
        Err(RelayError::Config(format!(
            "{name} of {}s is outside {}s..={}s",
            wait.as_secs(),
            MIN_WAIT.as_secs(),
            MAX_WAIT.as_secs()
        )))
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set. Calls
    /// `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `LISTEN_ADDR` (or `HOST`/`PORT`)
    /// does not resolve to a socket address, or if the connection settings
    /// fail [`ConnectionSettings::validate`].
    pub fn from_env() -> Result<Self, RelayError> {
        dotenvy::dotenv().ok();

        let listen_addr = match std::env::var("LISTEN_ADDR") {
            Ok(addr) => resolve_addr(&addr)?,
            Err(_) => {
                let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
                resolve_addr(&format!("{host}:{port}"))?
            }
        };

        let debug = parse_env_bool("DEBUG", false);
        let json_logs = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let hub_mailbox_capacity = parse_env("HUB_MAILBOX_CAPACITY", DEFAULT_HUB_MAILBOX_CAPACITY);

        let connection = ConnectionSettings {
            send_queue_capacity: parse_env("WS_SEND_QUEUE_CAPACITY", DEFAULT_SEND_QUEUE_CAPACITY),
            write_wait: Duration::from_secs(parse_env(
                "WS_WRITE_WAIT_SECS",
                DEFAULT_WRITE_WAIT.as_secs(),
            )),
            pong_wait: Duration::from_secs(parse_env(
                "WS_PONG_WAIT_SECS",
                DEFAULT_PONG_WAIT.as_secs(),
            )),
            max_message_size: parse_env("WS_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE),
        };
        connection.validate()?;

        Ok(Self {
            listen_addr,
            debug,
            json_logs,
            hub_mailbox_capacity,
            connection,
        })
    }
}

/// Resolves `host:port` (IP literal or host name) to its first address.
fn resolve_addr(addr: &str) -> Result<SocketAddr, RelayError> {
    addr.to_socket_addrs()
        .map_err(|e| RelayError::Config(format!("cannot resolve listen address {addr}: {e}")))?
        .next()
        .ok_or_else(|| RelayError::Config(format!("listen address {addr} resolved to nothing")))
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref().map(str::to_ascii_lowercase) {
        Some(v) if v == "true" || v == "1" => true,
        Some(v) if v == "false" || v == "0" => false,
        _ => default,
    }
}

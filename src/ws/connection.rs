//! Reader and writer pumps for a single WebSocket connection.
//!
//! Each connection runs two independent tasks:
//!
//! - the **reader** decodes inbound frames, answers `hello` itself and
//!   relays everything else through the hub;
//! - the **writer** drains the outbound queue onto the socket and sends
//!   keepalive pings.
//!
//! Either pump closes the shared [`ConnectionHandle`] on exit, which stops
//! the other one. The pumps are generic over the socket halves so they can
//! be driven by in-memory streams in tests.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, close_code};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tungstenite::error::ProtocolError;

use super::client::{Client, ConnectionHandle};
use super::messages::Envelope;
use crate::config::ConnectionSettings;
use crate::domain::{ClientId, Hub};

/// Why a reader pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReadExit {
    /// The peer sent a close frame with this code (if any).
    PeerClosed(Option<u16>),
    /// The stream ended without a close frame.
    StreamEnded,
    /// The peer dropped the connection without a closing handshake.
    Reset,
    /// Nothing arrived within the liveness window.
    Idle,
    /// The transport reported an error (including oversized messages).
    Transport(String),
    /// The writer side closed the connection.
    ConnectionClosed,
    /// The hub is gone.
    HubUnavailable,
}

impl ReadExit {
    /// Returns `true` for the ordinary ways a session ends: normal closure,
    /// going away, abnormal closure, a dropped socket, or teardown started
    /// by the writer.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::PeerClosed(None) | Self::StreamEnded | Self::Reset | Self::ConnectionClosed => {
                true
            }
            Self::PeerClosed(Some(code)) => is_expected_close(*code),
            Self::Idle | Self::Transport(_) | Self::HubUnavailable => false,
        }
    }
}

impl fmt::Display for ReadExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed(Some(code)) => write!(f, "peer closed with code {code}"),
            Self::PeerClosed(None) => write!(f, "peer closed"),
            Self::StreamEnded => write!(f, "stream ended"),
            Self::Reset => write!(f, "connection reset without closing handshake"),
            Self::Idle => write!(f, "read deadline exceeded"),
            Self::Transport(error) => write!(f, "transport error: {error}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::HubUnavailable => write!(f, "hub unavailable"),
        }
    }
}

/// Why a writer pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WriteExit {
    /// The hub closed the outbound queue and it has been drained.
    QueueClosed,
    /// The reader side closed the connection.
    ConnectionClosed,
    /// A write did not complete within the write deadline.
    Deadline,
    /// The transport reported an error.
    Transport(String),
}

impl fmt::Display for WriteExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueClosed => write!(f, "outbound queue closed"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Deadline => write!(f, "write deadline exceeded"),
            Self::Transport(error) => write!(f, "transport error: {error}"),
        }
    }
}

/// Close codes treated as an ordinary end of session.
#[must_use]
pub(crate) fn is_expected_close(code: u16) -> bool {
    matches!(
        code,
        close_code::NORMAL | close_code::AWAY | close_code::ABNORMAL
    )
}

/// Returns `true` if a read error only means the peer went away: a reset
/// without closing handshake, a closed connection, or a dropped socket.
pub(crate) fn is_disconnect(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(ws) = err.downcast_ref::<tungstenite::Error>() {
            return match ws {
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed
                | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
                tungstenite::Error::Io(source) => is_disconnect_kind(source.kind()),
                _ => false,
            };
        }
        if let Some(source) = err.downcast_ref::<io::Error>() {
            return is_disconnect_kind(source.kind());
        }
        current = err.source();
    }
    false
}

fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// `now + wait`, saturating far in the future instead of overflowing.
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

/// Roughly thirty years.
const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

/// Attaches an upgraded connection to the hub and starts both pumps.
///
/// Registers the client before spawning anything, so the first broadcast
/// it can see is one processed after registration. Returns as soon as the
/// pumps are spawned.
pub async fn attach<K, S, E>(sink: K, stream: S, hub: Hub, settings: ConnectionSettings)
where
    K: Sink<Message> + Unpin + Send + 'static,
    K::Error: fmt::Display,
    S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: StdError + Send + 'static,
{
    let id = ClientId::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.send_queue_capacity.max(1));
    let connection = ConnectionHandle::new();
    let client = Client::new(id, hub.clone(), &outbound_tx, connection.clone());

    if let Err(error) = hub.register(id, outbound_tx).await {
        tracing::error!(client_id = %id, %error, "cannot register client");
        return;
    }
    tracing::info!(client_id = %id, "client connected");

    tokio::spawn(write_pump(id, outbound_rx, sink, connection, settings));
    tokio::spawn(read_pump(client, stream, settings));
}

/// Reader pump. Always unregisters the client and closes the connection
/// on exit.
pub async fn read_pump<S, E>(client: Client, mut stream: S, settings: ConnectionSettings)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: StdError + 'static,
{
    let exit = read_loop(&client, &mut stream, settings.pong_wait).await;
    if exit.is_expected() {
        tracing::debug!(client_id = %client.id(), reason = %exit, "reader stopped");
    } else {
        tracing::warn!(client_id = %client.id(), reason = %exit, "reader stopped unexpectedly");
    }

    if let Err(error) = client.hub().unregister(client.id()).await {
        tracing::debug!(client_id = %client.id(), %error, "unregister skipped");
    }
    client.connection().close();
    tracing::info!(client_id = %client.id(), "client disconnected");
}

async fn read_loop<S, E>(client: &Client, stream: &mut S, pong_wait: Duration) -> ReadExit
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: StdError + 'static,
{
    let mut deadline = deadline_after(pong_wait);
    loop {
        let next = tokio::select! {
            () = client.connection().closed() => return ReadExit::ConnectionClosed,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };
        let message = match next {
            Err(_) => return ReadExit::Idle,
            Ok(None) => return ReadExit::StreamEnded,
            Ok(Some(Err(error))) if is_disconnect(&error) => return ReadExit::Reset,
            Ok(Some(Err(error))) => return ReadExit::Transport(error.to_string()),
            Ok(Some(Ok(message))) => message,
        };
        deadline = deadline_after(pong_wait);

        let raw = match message {
            Message::Text(text) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Message::Binary(bytes) => bytes,
            Message::Close(frame) => return ReadExit::PeerClosed(frame.map(|f| f.code)),
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if let Err(exit) = dispatch(client, raw).await {
            return exit;
        }
    }
}

/// Routes one inbound frame: `hello` is answered directly, anything else
/// is relayed to the other clients. Undecodable frames are dropped.
async fn dispatch(client: &Client, raw: Bytes) -> Result<(), ReadExit> {
    let envelope = match Envelope::decode(&raw) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(client_id = %client.id(), %error, "dropping malformed frame");
            return Ok(());
        }
    };

    if envelope.is_hello() {
        match client.reply(&Envelope::welcome()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(client_id = %client.id(), "outbound queue closed, welcome dropped");
            }
            Err(error) => {
                tracing::error!(client_id = %client.id(), %error, "welcome not sent");
            }
        }
        return Ok(());
    }

    client
        .hub()
        .relay(client.id(), raw)
        .await
        .map_err(|_| ReadExit::HubUnavailable)
}

/// Writer pump. Always closes the connection on exit.
pub async fn write_pump<K>(
    id: ClientId,
    mut outbound: mpsc::Receiver<Bytes>,
    mut sink: K,
    connection: ConnectionHandle,
    settings: ConnectionSettings,
) where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    let exit = write_loop(&mut outbound, &mut sink, &connection, settings).await;
    match exit {
        WriteExit::QueueClosed | WriteExit::ConnectionClosed => {
            tracing::debug!(client_id = %id, reason = %exit, "writer stopped");
        }
        WriteExit::Deadline | WriteExit::Transport(_) => {
            tracing::warn!(client_id = %id, reason = %exit, "writer stopped unexpectedly");
        }
    }
    connection.close();
}

async fn write_loop<K>(
    outbound: &mut mpsc::Receiver<Bytes>,
    sink: &mut K,
    connection: &ConnectionHandle,
    settings: ConnectionSettings,
) -> WriteExit
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    let ping_period = settings.ping_period().max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(deadline_after(ping_period), ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = connection.closed() => return WriteExit::ConnectionClosed,
            item = outbound.recv() => {
                let Some(first) = item else {
                    // Best effort: the peer may already be gone.
                    let _ = send_with_deadline(sink, Message::Close(None), settings.write_wait).await;
                    return WriteExit::QueueClosed;
                };
                let message = coalesce(first, outbound);
                if let Err(exit) = send_with_deadline(sink, message, settings.write_wait).await {
                    return exit;
                }
            }
            _ = ticker.tick() => {
                let ping = Message::Ping(Bytes::new());
                if let Err(exit) = send_with_deadline(sink, ping, settings.write_wait).await {
                    return exit;
                }
            }
        }
    }
}

/// Joins `first` and the frames queued at the moment it was taken into
/// one newline-separated message, preserving queue order. Frames enqueued
/// while joining wait for the next write.
fn coalesce(first: Bytes, outbound: &mut mpsc::Receiver<Bytes>) -> Message {
    let mut buf = Vec::with_capacity(first.len());
    buf.extend_from_slice(&first);
    for _ in 0..outbound.len() {
        let Ok(next) = outbound.try_recv() else {
            break;
        };
        buf.push(b'\n');
        buf.extend_from_slice(&next);
    }
    match String::from_utf8(buf) {
        Ok(text) => Message::text(text),
        Err(error) => Message::binary(error.into_bytes()),
    }
}

async fn send_with_deadline<K>(
    sink: &mut K,
    message: Message,
    deadline: Duration,
) -> Result<(), WriteExit>
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    match tokio::time::timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(WriteExit::Transport(error.to_string())),
        Err(_) => Err(WriteExit::Deadline),
    }
}

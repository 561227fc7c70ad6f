//! Per-connection client state.
//!
//! A [`Client`] is what the reader pump carries around: its identity, a
//! handle to the hub for control messages, a weak sender onto its own
//! outbound queue (for self-replies) and the shared [`ConnectionHandle`].

use std::sync::Arc;

use axum::body::Bytes;
use tokio::sync::{mpsc, watch};

use super::messages::Envelope;
use crate::domain::{ClientId, Hub};
use crate::error::RelayError;

/// Close flag shared by the two pumps of one connection.
///
/// Closing is idempotent: the first [`close`](Self::close) flips the flag
/// and wakes every waiter, later calls do nothing.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    closed: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// Creates an open handle.
    #[must_use]
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            closed: Arc::new(closed),
        }
    }

    /// Marks the connection closed. Returns `true` only for the call that
    /// actually closed it.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    /// Returns `true` once the connection has been closed.
    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// One live connection, as seen from its reader pump.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    hub: Hub,
    outbound: mpsc::WeakSender<Bytes>,
    connection: ConnectionHandle,
}

impl Client {
    /// Creates the client record. Only a weak reference to `outbound` is
    /// kept, so the queue closes as soon as the hub drops its entry.
    #[must_use]
    pub fn new(
        id: ClientId,
        hub: Hub,
        outbound: &mpsc::Sender<Bytes>,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            id,
            hub,
            outbound: outbound.downgrade(),
            connection,
        }
    }

    /// Connection identity.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Hub this client is registered with.
    #[must_use]
    pub const fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Shared close flag of this connection.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Enqueues `envelope` on this client's own outbound queue, bypassing
    /// the hub. Waits for room if the queue is full.
    ///
    /// Returns `Ok(false)` if the queue has already been closed, either by
    /// the hub or because the writer pump is gone.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Encode`] if the envelope cannot be encoded.
    pub async fn reply(&self, envelope: &Envelope) -> Result<bool, RelayError> {
        let frame = Bytes::from(envelope.encode()?);
        let Some(outbound) = self.outbound.upgrade() else {
            return Ok(false);
        };
        Ok(outbound.send(frame).await.is_ok())
    }
}

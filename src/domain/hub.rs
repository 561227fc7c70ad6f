//! Connection hub: the single owner of the live-connection registry.
//!
//! [`Hub`] is a cheap, cloneable handle to an actor task started by
//! [`Hub::start`]. The task owns the registry exclusively and processes
//! one command at a time from a bounded mailbox, so registration,
//! unregistration and broadcast fan-out are globally serialized without any
//! lock around the registry.
//!
//! # Backpressure
//!
//! Fan-out never blocks: every registered outbound queue receives the frame
//! through `try_send`. A client whose queue is full is considered dead. Its
//! registry entry (the only strong sender of its queue) is dropped in the
//! same step, which closes the queue and lets its writer pump drain and
//! disconnect.

use std::collections::HashMap;

use axum::body::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::ClientId;
use crate::error::RelayError;

/// Messages processed by the hub task, one at a time.
#[derive(Debug)]
enum HubCommand {
    /// Add a client and its outbound queue to the registry.
    Register {
        id: ClientId,
        outbound: mpsc::Sender<Bytes>,
    },
    /// Remove a client; closes its outbound queue if it was registered.
    Unregister(ClientId),
    /// Fan a frame out to every registered client except `origin`.
    Broadcast {
        origin: Option<ClientId>,
        frame: Bytes,
    },
    /// Report the number of registered clients.
    ClientCount(oneshot::Sender<usize>),
}

/// Handle to the hub task.
///
/// Cloning the handle is cheap; every clone talks to the same task. The
/// task stops once every handle has been dropped, releasing all outbound
/// queues it still holds.
#[derive(Debug, Clone)]
pub struct Hub {
    mailbox: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Creates the hub and spawns its coordinating loop on the current
    /// tokio runtime.
    ///
    /// `mailbox_capacity` bounds the number of pending commands; senders
    /// wait only while the loop catches up. A capacity of zero is raised
    /// to one.
    #[must_use]
    pub fn start(mailbox_capacity: usize) -> Self {
        let (mailbox, commands) = mpsc::channel(mailbox_capacity.max(1));
        tokio::spawn(run(commands));
        Self { mailbox }
    }

    /// Registers a client. Frames broadcast after this command is
    /// processed are delivered to `outbound`; earlier ones are not.
    ///
    /// The hub keeps the only long-lived strong reference to `outbound`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] if the hub task has stopped.
    pub async fn register(
        &self,
        id: ClientId,
        outbound: mpsc::Sender<Bytes>,
    ) -> Result<(), RelayError> {
        self.send(HubCommand::Register { id, outbound }).await
    }

    /// Unregisters a client. Unknown or already removed clients are
    /// ignored, so calling this more than once is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] if the hub task has stopped.
    pub async fn unregister(&self, id: ClientId) -> Result<(), RelayError> {
        self.send(HubCommand::Unregister(id)).await
    }

    /// Broadcasts a server-originated frame to every registered client.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] if the hub task has stopped.
    pub async fn broadcast(&self, frame: Bytes) -> Result<(), RelayError> {
        self.send(HubCommand::Broadcast {
            origin: None,
            frame,
        })
        .await
    }

    /// Relays a frame received from `origin` to every other registered
    /// client.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] if the hub task has stopped.
    pub async fn relay(&self, origin: ClientId, frame: Bytes) -> Result<(), RelayError> {
        self.send(HubCommand::Broadcast {
            origin: Some(origin),
            frame,
        })
        .await
    }

    /// Returns the number of currently registered clients.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::HubUnavailable`] if the hub task has stopped
    /// or dropped the reply.
    pub async fn client_count(&self) -> Result<usize, RelayError> {
        let (reply, answer) = oneshot::channel();
        self.send(HubCommand::ClientCount(reply)).await?;
        answer.await.map_err(|_| RelayError::HubUnavailable)
    }

    async fn send(&self, command: HubCommand) -> Result<(), RelayError> {
        self.mailbox
            .send(command)
            .await
            .map_err(|_| RelayError::HubUnavailable)
    }
}

/// Hub loop: drains the mailbox until every [`Hub`] handle is gone.
async fn run(mut commands: mpsc::Receiver<HubCommand>) {
    let mut registry = Registry::default();
    tracing::debug!("hub started");

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { id, outbound } => {
                registry.register(id, outbound);
                tracing::debug!(client_id = %id, clients = registry.len(), "client registered");
            }
            HubCommand::Unregister(id) => {
                if registry.unregister(id) {
                    tracing::debug!(client_id = %id, clients = registry.len(), "client unregistered");
                }
            }
            HubCommand::Broadcast { origin, frame } => {
                for id in registry.broadcast(origin, &frame) {
                    tracing::warn!(client_id = %id, "outbound queue unavailable, dropping client");
                }
            }
            HubCommand::ClientCount(reply) => {
                let _ = reply.send(registry.len());
            }
        }
    }

    tracing::debug!(clients = registry.len(), "hub stopped");
}

/// Set of registered clients. Owned and mutated only by the hub loop.
#[derive(Debug, Default)]
struct Registry {
    clients: HashMap<ClientId, mpsc::Sender<Bytes>>,
}

impl Registry {
    fn register(&mut self, id: ClientId, outbound: mpsc::Sender<Bytes>) {
        self.clients.insert(id, outbound);
    }

    /// Removes `id`, dropping (and thereby closing) its outbound queue.
    /// Returns `false` if it was not registered.
    fn unregister(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    /// Enqueues `frame` on every queue except `origin`'s and returns the
    /// clients evicted because their queue was full or already closed.
    fn broadcast(&mut self, origin: Option<ClientId>, frame: &Bytes) -> Vec<ClientId> {
        let mut evicted = Vec::new();
        self.clients.retain(|id, outbound| {
            if Some(*id) == origin {
                return true;
            }
            match outbound.try_send(frame.clone()) {
                Ok(()) => true,
                Err(_) => {
                    evicted.push(*id);
                    false
                }
            }
        });
        evicted
    }

    fn len(&self) -> usize {
        self.clients.len()
    }
}

//! WebSocket layer: upgrade entry point, per-connection pumps and the
//! message envelope.
//!
//! The endpoint at `/ws` attaches every upgraded connection to the
//! [`Hub`](crate::domain::Hub), which relays frames between all connected
//! clients.

pub mod client;
pub mod connection;
pub mod handler;
pub mod messages;

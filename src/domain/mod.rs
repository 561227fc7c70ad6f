//! Domain layer: connection identity and the connection hub.
//!
//! The hub is the only owner of the set of live connections; everything
//! else talks to it through the cloneable [`Hub`] handle.

pub mod client_id;
pub mod hub;

pub use client_id::ClientId;
pub use hub::Hub;

//! WebSocket message envelope.

use serde::{Deserialize, Serialize};

/// Envelope type sent by a client to greet the server.
pub const HELLO: &str = "hello";
/// Envelope type of the server's reply to [`HELLO`].
pub const WELCOME: &str = "welcome";
/// Greeting carried in the [`WELCOME`] payload.
pub const WELCOME_MESSAGE: &str = "Hello from server!";

/// Top-level WebSocket message envelope.
///
/// Only `msg_type` is inspected; `payload` is relayed untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Arbitrary payload. Absent payloads decode as `null`.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Decodes an envelope from raw frame bytes.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if the bytes are not a JSON object
    /// with a string `type` field.
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Returns `true` for a client greeting.
    #[must_use]
    pub fn is_hello(&self) -> bool {
        self.msg_type == HELLO
    }

    /// Builds the server's fixed reply to a greeting.
    #[must_use]
    pub fn welcome() -> Self {
        Self {
            msg_type: WELCOME.to_string(),
            payload: serde_json::json!({ "message": WELCOME_MESSAGE }),
        }
    }

    /// Encodes the envelope as compact JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

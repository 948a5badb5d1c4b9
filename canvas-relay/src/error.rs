//! Error taxonomy for the relay.
//!
//! None of these is fatal to the process. Transport errors end the affected
//! session (or evict the affected peer), malformed payloads are dropped.
//!
//! Transport variants render the inner error in their own message and do not
//! expose it again as `source()`, so a chained report prints it once.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum RelayError {
    /// WebSocket upgrade failed; the session never started.
    #[error("Handshake failed: {0}")]
    Handshake(tungstenite::Error),
    /// Peer disconnected or violated the framing protocol.
    #[error("Read failed: {0}")]
    Read(tungstenite::Error),
    /// Sending to a specific peer failed.
    #[error("Write failed: {0}")]
    Write(tungstenite::Error),
    /// The event discriminant could not be parsed.
    #[error("Malformed payload: {0}")]
    Malformed(String),
    /// The connection is no longer in the registry (already evicted).
    #[error("Connection {0} is not registered")]
    NotRegistered(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

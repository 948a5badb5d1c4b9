//! Event classification and server-originated messages.
//!
//! Wire format: one JSON object per WebSocket text frame, tagged by `type`.
//! ```text
//! ┌────────────────┬───────────┬──────────────────────────────────────┐
//! │ type           │ direction │ effect                               │
//! ├────────────────┼───────────┼──────────────────────────────────────┤
//! │ init           │ S → C     │ assigned identity, once at connect   │
//! │ draw           │ C → S → * │ appended to history, rebroadcast     │
//! │ clear          │ C → S → * │ history reset, rebroadcast           │
//! │ cursor_remove  │ S → *     │ departing identity                   │
//! │ anything else  │ C → S → * │ rebroadcast only                     │
//! └────────────────┴───────────┴──────────────────────────────────────┘
//! ```
//!
//! Client payloads are never re-serialized: the relay only peeks at the
//! discriminant and forwards the original text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};

use crate::error::{RelayError, Result};

/// A serialized event, stored and relayed verbatim.
///
/// Backed by shared bytes, so cloning for history or fan-out is O(1).
pub type Payload = Utf8Bytes;

/// Discriminant values with relay-side meaning.
pub const DRAW: &str = "draw";
pub const CLEAR: &str = "clear";

/// How an inbound event affects shared state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Append to history, then broadcast.
    Draw,
    /// Reset history, then broadcast.
    Clear,
    /// Broadcast only. Carries the discriminant (empty when absent).
    Passthrough(String),
}

impl EventKind {
    /// Whether this event changes the replay history.
    pub fn mutates_history(&self) -> bool {
        matches!(self, Self::Draw | Self::Clear)
    }
}

/// Classify a raw payload by its `type` field.
///
/// The payload must be a JSON object. A missing or null `type` is treated
/// as an unknown discriminant and passes through.
pub fn classify(text: &str) -> Result<EventKind> {
    let value: Value = serde_json::from_str(text)?;
    let object = value
        .as_object()
        .ok_or_else(|| RelayError::Malformed("expected a JSON object".to_string()))?;

    match object.get("type") {
        None | Some(Value::Null) => Ok(EventKind::Passthrough(String::new())),
        Some(Value::String(kind)) => Ok(match kind.as_str() {
            DRAW => EventKind::Draw,
            CLEAR => EventKind::Clear,
            other => EventKind::Passthrough(other.to_string()),
        }),
        Some(other) => Err(RelayError::Malformed(format!(
            "`type` must be a string, got {other}"
        ))),
    }
}

/// Extract an event payload from an inbound frame.
///
/// Returns `None` for control frames. Binary frames are accepted when they
/// hold valid UTF-8.
pub fn frame_payload(msg: Message) -> Option<Result<Payload>> {
    match msg {
        Message::Text(text) => Some(Ok(text)),
        Message::Binary(data) => Some(
            Payload::try_from(data)
                .map_err(|e| RelayError::Malformed(format!("binary frame is not UTF-8: {e}"))),
        ),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}

/// Messages synthesized by the relay itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once to a new connection with its assigned identity.
    Init { id: String },
    /// Broadcast to remaining connections when a client departs.
    CursorRemove { id: String },
}

impl ServerMessage {
    pub fn init(id: impl Into<String>) -> Self {
        Self::Init { id: id.into() }
    }

    pub fn cursor_remove(id: impl Into<String>) -> Self {
        Self::CursorRemove { id: id.into() }
    }

    /// Serialize to a text payload.
    pub fn to_payload(&self) -> Result<Payload> {
        Ok(serde_json::to_string(self)?.into())
    }
}

//! # canvas-relay — Real-time broadcast relay for shared drawing canvases
//!
//! Clients connect over WebSocket and send JSON events (strokes, clears,
//! cursor moves). The relay fans each event out to every connected client
//! and keeps an ordered replay log so late joiners can rebuild the canvas.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐
//! │ Client      │ ◄────────────────► │ Session      │
//! │ (per user)  │    JSON text       │ (per task)   │
//! └─────────────┘                    └──────┬───────┘
//!                                           │ dispatch
//!                              ┌────────────┴────────────┐
//!                              ▼                         ▼
//!                      ┌──────────────┐         ┌─────────────────┐
//!                      │ EventLog     │         │ BroadcastEngine │
//!                      │ (replay)     │         │ (fan-out)       │
//!                      └──────────────┘         └────────┬────────┘
//!                                                        ▼
//!                                               ┌─────────────────┐
//!                                               │ Registry        │
//!                                               └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Discriminant classification and relay-originated messages
//! - [`history`] — Ordered replay log
//! - [`registry`] — Live connections behind one lock
//! - [`broadcast`] — Fan-out with per-peer eviction
//! - [`context`] — Shared relay state and dispatch
//! - [`session`] — Per-connection lifecycle
//! - [`server`] — Listener and upgrade handshake

pub mod error;
pub mod protocol;
pub mod history;
pub mod registry;
pub mod broadcast;
pub mod context;
pub mod session;
pub mod server;

// Re-exports for convenience
pub use error::{RelayError, Result};
pub use protocol::{classify, EventKind, Payload, ServerMessage};
pub use history::EventLog;
pub use registry::{Connection, ConnectionKey, ConnectionRegistry, Membership, Outbound};
pub use broadcast::{BroadcastEngine, BroadcastReport, BroadcastStats};
pub use context::{RelayContext, RelayPolicy, ServerStats};
pub use session::run_session;
pub use server::{RelayServer, ServerConfig};

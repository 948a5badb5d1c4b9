//! Shared relay state: the event log, the connection registry and counters.
//!
//! Built once at process start and handed to every session behind an `Arc`.
//! Lock order is registry, then log. Dispatch takes the registry lock,
//! mutates the log and fans out under that one critical section, so log
//! order and broadcast order always agree. Replay reads the log and releases
//! it before touching the registry, so the order is never inverted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::broadcast::{BroadcastEngine, BroadcastReport};
use crate::error::Result;
use crate::history::EventLog;
use crate::protocol::{classify, EventKind, Payload};
use crate::registry::{ConnectionKey, ConnectionRegistry};

/// Per-session behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayPolicy {
    /// Assign identities, send `init`, announce departures.
    pub track_identity: bool,
    /// Include the sender in the rebroadcast of its own events.
    pub echo_to_sender: bool,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            track_identity: true,
            echo_to_sender: true,
        }
    }
}

/// Point-in-time relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub messages_received: u64,
    pub malformed_messages: u64,
    pub events_logged: u64,
    pub history_clears: u64,
    pub history_len: usize,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    messages_received: AtomicU64,
    malformed_messages: AtomicU64,
    events_logged: AtomicU64,
    history_clears: AtomicU64,
}

/// Process-wide relay context.
pub struct RelayContext {
    policy: RelayPolicy,
    history: EventLog,
    registry: Arc<ConnectionRegistry>,
    broadcaster: BroadcastEngine,
    stats: AtomicRelayStats,
}

impl RelayContext {
    pub fn new(policy: RelayPolicy) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            policy,
            history: EventLog::new(),
            broadcaster: BroadcastEngine::new(registry.clone()),
            registry,
            stats: AtomicRelayStats::default(),
        }
    }

    pub fn policy(&self) -> RelayPolicy {
        self.policy
    }

    pub fn history(&self) -> &EventLog {
        &self.history
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &BroadcastEngine {
        &self.broadcaster
    }

    pub(crate) fn record_connection(&self) {
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a frame that never reached classification (e.g. non-UTF-8 binary).
    pub(crate) fn record_rejected(&self) {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        self.stats.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Classify an inbound payload, apply it to the log, and rebroadcast it.
    ///
    /// A malformed payload is counted and returned as an error; it never
    /// reaches the log or any peer.
    pub async fn dispatch(&self, sender: ConnectionKey, payload: Payload) -> Result<EventKind> {
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        let kind = match classify(payload.as_str()) {
            Ok(kind) => kind,
            Err(e) => {
                self.stats.malformed_messages.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let mut peers = self.registry.lock().await;
        match &kind {
            EventKind::Clear => {
                self.history.clear().await;
                self.stats.history_clears.fetch_add(1, Ordering::Relaxed);
                log::info!("History cleared by {sender}");
            }
            EventKind::Draw => {
                self.history.append(payload.clone()).await;
                self.stats.events_logged.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::Passthrough(discriminant) => {
                log::trace!("Passthrough `{discriminant}` from {sender}");
            }
        }

        let skip = (!self.policy.echo_to_sender).then_some(sender);
        self.broadcaster.fan_out(&mut peers, &payload, skip).await;
        Ok(kind)
    }

    /// Broadcast a relay-originated payload to every registered connection.
    pub async fn announce(&self, payload: &Payload) -> BroadcastReport {
        self.broadcaster.broadcast(payload, None).await
    }

    pub async fn stats(&self) -> ServerStats {
        let broadcast = self.broadcaster.stats();
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.registry.len().await,
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            malformed_messages: self.stats.malformed_messages.load(Ordering::Relaxed),
            events_logged: self.stats.events_logged.load(Ordering::Relaxed),
            history_clears: self.stats.history_clears.load(Ordering::Relaxed),
            history_len: self.history.len().await,
            broadcasts: broadcast.broadcasts,
            deliveries: broadcast.deliveries,
            evictions: broadcast.evictions,
        }
    }
}

impl Default for RelayContext {
    fn default() -> Self {
        Self::new(RelayPolicy::default())
    }
}

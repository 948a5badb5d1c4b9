//! Fan-out of one payload to every registered connection.
//!
//! A broadcast pass holds the registry lock for its whole duration and
//! writes to each peer in turn. A failed write evicts and closes that peer
//! inside the same pass; the remaining peers still receive the payload.
//!
//! ```text
//!            ┌──────────── registry lock ────────────┐
//! payload ──►│ peer A: send ✓                         │
//!            │ peer B: send ✗ ── evict, close         │
//!            │ peer C: send ✓                         │
//!            └────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::protocol::Payload;
use crate::registry::{ConnectionKey, ConnectionRegistry, RegistryGuard};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub broadcasts: u64,
    pub deliveries: u64,
    pub evictions: u64,
}

/// Lock-free counters updated on the hot path.
#[derive(Default)]
struct AtomicBroadcastStats {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
}

/// Outcome of a single broadcast pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that received the payload.
    pub delivered: usize,
    /// Connections removed because their write failed.
    pub evicted: Vec<ConnectionKey>,
}

/// Delivers payloads to every connection in a registry.
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    /// Send `payload` to every registered connection except `skip`.
    pub async fn broadcast(&self, payload: &Payload, skip: Option<ConnectionKey>) -> BroadcastReport {
        let mut guard = self.registry.lock().await;
        self.fan_out(&mut guard, payload, skip).await
    }

    /// Broadcast pass over a registry lock the caller already holds.
    ///
    /// Lets a caller mutate other state and broadcast inside one critical
    /// section, so every peer observes those mutations in the same order.
    pub async fn fan_out(
        &self,
        guard: &mut RegistryGuard<'_>,
        payload: &Payload,
        skip: Option<ConnectionKey>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (key, connection) in guard.iter_mut() {
            if Some(key) == skip {
                continue;
            }
            match connection.send(payload).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::warn!("Broadcast write to {key} failed, evicting: {e}");
                    report.evicted.push(key);
                }
            }
        }
        for key in &report.evicted {
            if let Some(connection) = guard.evict(*key) {
                connection.close().await;
            }
        }

        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .evictions
            .fetch_add(report.evicted.len() as u64, Ordering::Relaxed);

        report
    }

    /// Get broadcast statistics (lock-free snapshot).
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }
}

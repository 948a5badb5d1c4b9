//! Connection registry: the set of live peers.
//!
//! All access goes through one exclusive lock, including the iteration done
//! by a broadcast pass. Callers never see the underlying map; they register,
//! deregister, send to one key, or take a [`RegistryGuard`] for a full pass.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{Sink, SinkExt};
use tokio::sync::{oneshot, Mutex, MutexGuard};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::{RelayError, Result};
use crate::protocol::Payload;

/// Write half of a peer's channel.
pub type Outbound = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Registry key, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(u64);

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered peer.
///
/// Dropping a `Connection` revokes its [`Membership`].
pub struct Connection {
    identity: Option<String>,
    sink: Outbound,
    _membership: oneshot::Sender<()>,
}

impl Connection {
    /// Send one text frame.
    pub async fn send(&mut self, payload: &Payload) -> Result<()> {
        self.sink
            .send(Message::Text(payload.clone()))
            .await
            .map_err(RelayError::Write)
    }

    /// Close the channel. Errors are expected for dead peers and only logged.
    pub async fn close(mut self) {
        if let Err(e) = self.sink.close().await {
            log::debug!("Closing connection failed: {e}");
        }
    }
}

/// Handle held by a session while its connection is registered.
///
/// Resolves once the connection leaves the registry, whether through
/// eviction or deregistration.
pub struct Membership {
    rx: oneshot::Receiver<()>,
}

impl Membership {
    /// Wait until the connection is removed from the registry.
    ///
    /// Cancel-safe; must not be awaited again after it has resolved.
    pub async fn revoked(&mut self) {
        let _ = (&mut self.rx).await;
    }

    /// Non-blocking check.
    pub fn is_revoked(&mut self) -> bool {
        matches!(self.rx.try_recv(), Err(oneshot::error::TryRecvError::Closed))
    }
}

/// Live connections guarded by a single mutex.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionKey, Connection>>,
    next_key: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Always succeeds.
    pub async fn register(
        &self,
        sink: Outbound,
        identity: Option<String>,
    ) -> (ConnectionKey, Membership) {
        let key = ConnectionKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let connection = Connection {
            identity,
            sink,
            _membership: tx,
        };
        self.connections.lock().await.insert(key, connection);
        (key, Membership { rx })
    }

    /// Remove and close a connection, returning its identity if it had one.
    ///
    /// Returns `None` as well when the key was already evicted.
    pub async fn deregister(&self, key: ConnectionKey) -> Option<String> {
        let connection = self.connections.lock().await.remove(&key)?;
        let identity = connection.identity.clone();
        connection.close().await;
        identity
    }

    /// Send to a single registered connection.
    ///
    /// The failing connection is left in place; the caller decides whether
    /// to deregister it.
    pub async fn send_to(&self, key: ConnectionKey, payload: &Payload) -> Result<()> {
        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(&key)
            .ok_or(RelayError::NotRegistered(key.0))?;
        connection.send(payload).await
    }

    /// Take the registry lock for a full pass over every connection.
    ///
    /// Writers are blocked until the guard is dropped.
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            connections: self.connections.lock().await,
        }
    }

    pub async fn contains(&self, key: ConnectionKey) -> bool {
        self.connections.lock().await.contains_key(&key)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Identities of all registered connections that have one.
    pub async fn identities(&self) -> Vec<String> {
        self.connections
            .lock()
            .await
            .values()
            .filter_map(|c| c.identity.clone())
            .collect()
    }
}

/// Exclusive view of the registry for the duration of one pass.
pub struct RegistryGuard<'a> {
    connections: MutexGuard<'a, HashMap<ConnectionKey, Connection>>,
}

impl RegistryGuard<'_> {
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ConnectionKey, &mut Connection)> {
        self.connections.iter_mut().map(|(key, conn)| (*key, conn))
    }

    /// Remove a connection while the lock is held by this pass.
    pub fn evict(&mut self, key: ConnectionKey) -> Option<Connection> {
        self.connections.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;

    /// In-memory connection: frames land in the returned receiver, and
    /// dropping the receiver makes every send fail.
    pub(crate) fn channel_connection() -> (Outbound, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded();
        let sink = tx.sink_map_err(|_| WsError::ConnectionClosed);
        (Box::pin(sink), rx)
    }

    fn payload(s: &str) -> Payload {
        s.to_string().into()
    }

    #[tokio::test]
    async fn test_register_deregister() {
        let registry = ConnectionRegistry::new();
        let (sink, _rx) = channel_connection();

        let (key, _membership) = registry.register(sink, Some("alice".into())).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(key).await);
        assert_eq!(registry.identities().await, vec!["alice".to_string()]);

        assert_eq!(registry.deregister(key).await, Some("alice".to_string()));
        assert!(registry.is_empty().await);
        assert!(!registry.contains(key).await);
    }

    #[tokio::test]
    async fn test_deregister_anonymous_and_unknown() {
        let registry = ConnectionRegistry::new();
        let (sink, _rx) = channel_connection();
        let (key, _membership) = registry.register(sink, None).await;

        assert_eq!(registry.deregister(key).await, None);
        // Second removal is a no-op.
        assert_eq!(registry.deregister(key).await, None);
    }

    #[tokio::test]
    async fn test_keys_are_unique() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = channel_connection();
        let (b, _rb) = channel_connection();
        let (ka, _ma) = registry.register(a, None).await;
        let (kb, _mb) = registry.register(b, None).await;
        assert_ne!(ka, kb);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_identities_reported_by_registry() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = channel_connection();
        let (b, _rb) = channel_connection();
        let (ka, _ma) = registry.register(a, Some("alice".into())).await;
        let (_, _mb) = registry.register(b, None).await;

        // Anonymous peers have no identity to report.
        assert_eq!(registry.identities().await, vec!["alice".to_string()]);
        assert!(ka.to_string().starts_with('#'));
        assert_eq!(registry.deregister(ka).await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_send_to() {
        let registry = ConnectionRegistry::new();
        let (sink, mut rx) = channel_connection();
        let (key, _membership) = registry.register(sink, None).await;

        registry.send_to(key, &payload(r#"{"type":"draw"}"#)).await.unwrap();
        match rx.next().await {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), r#"{"type":"draw"}"#),
            other => panic!("Expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_to_failures() {
        let registry = ConnectionRegistry::new();
        let (sink, rx) = channel_connection();
        let (key, _membership) = registry.register(sink, None).await;
        drop(rx);

        let err = registry.send_to(key, &payload("{}")).await.unwrap_err();
        assert!(matches!(err, RelayError::Write(_)));

        registry.deregister(key).await;
        let err = registry.send_to(key, &payload("{}")).await.unwrap_err();
        assert!(matches!(err, RelayError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn test_membership_revoked_on_deregister() {
        let registry = ConnectionRegistry::new();
        let (sink, _rx) = channel_connection();
        let (key, mut membership) = registry.register(sink, None).await;
        assert!(!membership.is_revoked());

        registry.deregister(key).await;
        assert!(membership.is_revoked());
    }

    #[tokio::test]
    async fn test_membership_revoked_on_evict() {
        let registry = ConnectionRegistry::new();
        let (sink, _rx) = channel_connection();
        let (key, mut membership) = registry.register(sink, None).await;

        {
            let mut guard = registry.lock().await;
            assert_eq!(guard.len(), 1);
            let evicted = guard.evict(key).unwrap();
            drop(evicted);
            assert!(guard.is_empty());
        }

        tokio::time::timeout(std::time::Duration::from_secs(1), membership.revoked())
            .await
            .expect("membership should resolve after eviction");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_guard_blocks_writers() {
        let registry = std::sync::Arc::new(ConnectionRegistry::new());
        let guard = registry.lock().await;

        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let (sink, _rx) = channel_connection();
                registry.register(sink, None).await.0
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        drop(guard);

        let key = pending.await.unwrap();
        assert!(registry.contains(key).await);
    }
}

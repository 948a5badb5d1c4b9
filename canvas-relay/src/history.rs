//! Ordered replay log of history-mutating events.
//!
//! Appends and clears take the write lock; snapshots take the read lock and
//! copy the sequence out, so a reader sees either the pre-clear or the
//! post-clear state and never a mix.

use tokio::sync::RwLock;

use crate::protocol::Payload;

/// Append-only event log with clear-and-reset.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<Vec<Payload>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a payload to the tail.
    pub async fn append(&self, payload: Payload) {
        self.events.write().await.push(payload);
    }

    /// Atomically empty the log.
    pub async fn clear(&self) {
        // Swap rather than `clear()` so the old buffer is freed outside the lock.
        let old = std::mem::take(&mut *self.events.write().await);
        drop(old);
    }

    /// Full ordered sequence at a single instant.
    ///
    /// Payloads share their buffers with the log, so this is cheap even for
    /// long histories.
    pub async fn snapshot(&self) -> Vec<Payload> {
        self.events.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn draw(n: usize) -> Payload {
        format!(r#"{{"type":"draw","n":{n}}}"#).into()
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let log = EventLog::new();
        for n in 0..5 {
            log.append(draw(n)).await;
        }

        let snapshot = log.snapshot().await;
        assert_eq!(snapshot.len(), 5);
        for (n, payload) in snapshot.iter().enumerate() {
            assert_eq!(payload.as_str(), draw(n).as_str());
        }
    }

    #[tokio::test]
    async fn test_clear_empties_log() {
        let log = EventLog::new();
        log.append(draw(0)).await;
        log.append(draw(1)).await;
        assert_eq!(log.len().await, 2);

        log.clear().await;
        assert!(log.is_empty().await);
        assert!(log.snapshot().await.is_empty());

        // Appends after a clear start a fresh sequence.
        log.append(draw(7)).await;
        let snapshot = log.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].as_str(), draw(7).as_str());
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let log = EventLog::new();
        log.append(draw(0)).await;
        let snapshot = log.snapshot().await;

        log.append(draw(1)).await;
        log.clear().await;

        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_recorded() {
        let log = Arc::new(EventLog::new());
        let mut handles = Vec::new();
        for writer in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                for n in 0..50 {
                    log.append(draw(writer * 100 + n)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(log.len().await, 400);
    }

    #[tokio::test]
    async fn test_snapshot_never_torn_by_clear() {
        let log = Arc::new(EventLog::new());
        let writer = {
            let log = log.clone();
            tokio::spawn(async move {
                for round in 0..100 {
                    for n in 0..4 {
                        log.append(draw(n)).await;
                    }
                    if round % 2 == 0 {
                        log.clear().await;
                    }
                }
            })
        };

        // Every snapshot is a prefix of some round: draw(0), draw(1), ...
        for _ in 0..200 {
            let snapshot = log.snapshot().await;
            for (i, payload) in snapshot.iter().enumerate() {
                assert_eq!(payload.as_str(), draw(i % 4).as_str());
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}

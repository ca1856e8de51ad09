//! The set of live connections.
//!
//! One mutex guards the map. It is held only to add or remove an entry or
//! to copy the current members; sends happen after it is released, so a
//! stalled peer never blocks joins, leaves, or other broadcasts.

use futures_util::future::join_all;
use locastream_protocol::Frame;
use locastream_transport::{Connection, ConnectionId, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

type Members = HashMap<ConnectionId, Arc<dyn Connection>>;

/// Outcome of one broadcast, for logging and metrics.
///
/// The sender of a message never sees this; a failed recipient surfaces
/// only as that recipient's own session ending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients the frame was written to.
    pub delivered: usize,
    /// Recipients whose send failed and that were removed.
    pub evicted: usize,
}

/// Concurrent set of live connection handles.
pub struct Registry {
    members: Mutex<Members>,
    send_timeout: Option<Duration>,
}

impl Registry {
    /// Create an empty registry with no send deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::with_send_timeout(None)
    }

    /// Create an empty registry. A send that takes longer than
    /// `send_timeout` counts as failed.
    #[must_use]
    pub fn with_send_timeout(send_timeout: Option<Duration>) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            send_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection.
    ///
    /// Returns `false` and leaves the existing entry in place if a handle
    /// with the same ID is already registered.
    pub fn register(&self, conn: Arc<dyn Connection>) -> bool {
        let mut members = self.lock();
        let id = conn.id().clone();

        if members.contains_key(&id) {
            debug!(connection = %id, "Already registered");
            return false;
        }

        members.insert(id.clone(), conn);
        debug!(connection = %id, members = members.len(), "Registered");
        true
    }

    /// Remove a connection if present.
    ///
    /// Removing an unknown ID is not an error: a failed broadcast and the
    /// connection's own teardown may both try.
    pub fn deregister(&self, id: &ConnectionId) -> Option<Arc<dyn Connection>> {
        let mut members = self.lock();
        let removed = members.remove(id);

        if removed.is_some() {
            debug!(connection = %id, members = members.len(), "Deregistered");
        }
        removed
    }

    /// Copy the current members, minus `exclude`.
    fn snapshot(&self, exclude: Option<&ConnectionId>) -> Vec<Arc<dyn Connection>> {
        self.lock()
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .map(|(_, conn)| Arc::clone(conn))
            .collect()
    }

    /// Send `frame` to every member except `exclude`.
    ///
    /// Recipients are taken from a snapshot at call time. Connections that
    /// join during the walk may or may not get this frame. Every recipient
    /// whose send fails is removed and closed before this returns; one
    /// failure never stops delivery to the others.
    pub async fn broadcast(&self, frame: &Frame, exclude: Option<&ConnectionId>) -> Delivery {
        let recipients = self.snapshot(exclude);
        if recipients.is_empty() {
            return Delivery::default();
        }

        let results = join_all(
            recipients
                .iter()
                .map(|conn| self.deliver(conn.as_ref(), frame.clone())),
        )
        .await;

        let mut delivery = Delivery::default();
        let mut failed = Vec::new();
        for (conn, result) in recipients.into_iter().zip(results) {
            match result {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    debug!(connection = %conn.id(), error = %e, "Send failed, evicting");
                    failed.push(conn);
                }
            }
        }

        if !failed.is_empty() {
            {
                let mut members = self.lock();
                for conn in &failed {
                    members.remove(conn.id());
                }
            }
            delivery.evicted = failed.len();
            // Closing wakes each evicted connection's receive loop.
            close_each(&failed).await;
        }

        trace!(
            delivered = delivery.delivered,
            evicted = delivery.evicted,
            bytes = frame.len(),
            "Broadcast"
        );
        delivery
    }

    async fn deliver(&self, conn: &dyn Connection, frame: Frame) -> Result<(), TransportError> {
        match self.send_timeout {
            Some(limit) => tokio::time::timeout(limit, conn.send(frame))
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => conn.send(frame).await,
        }
    }

    /// Close every registered connection.
    ///
    /// Members are not removed here; each one leaves when its receive loop
    /// observes the close. Returns the number of connections closed.
    pub async fn close_all(&self) -> usize {
        let members = self.snapshot(None);
        close_each(&members).await;
        members.len()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.lock().contains_key(id)
    }

    /// IDs of all registered connections.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.lock().keys().cloned().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

async fn close_each(conns: &[Arc<dyn Connection>]) {
    let results = join_all(conns.iter().map(|conn| conn.close())).await;
    for (conn, result) in conns.iter().zip(results) {
        if let Err(e) = result {
            warn!(connection = %conn.id(), error = %e, "Close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locastream_transport::{MemoryConnection, MemoryPeer};

    fn member() -> (Arc<dyn Connection>, MemoryPeer) {
        let (conn, peer) = MemoryConnection::pair();
        (Arc::new(conn), peer)
    }

    #[test]
    fn test_register_deregister() {
        let registry = Registry::new();
        let (a, _pa) = member();
        let (b, _pb) = member();

        assert!(registry.register(Arc::clone(&a)));
        assert!(registry.register(Arc::clone(&b)));
        assert_eq!(registry.len(), 2);

        assert!(registry.deregister(a.id()).is_some());
        assert!(!registry.contains(a.id()));
        assert!(registry.contains(b.id()));
        assert_eq!(registry.ids(), vec![b.id().clone()]);
    }

    #[test]
    fn test_duplicate_and_unknown_are_noops() {
        let registry = Registry::new();
        let (a, _pa) = member();

        assert!(registry.register(Arc::clone(&a)));
        assert!(!registry.register(Arc::clone(&a)));
        assert_eq!(registry.len(), 1);

        assert!(registry.deregister(a.id()).is_some());
        assert!(registry.deregister(a.id()).is_none());
        assert!(registry.deregister(&"never-seen".into()).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let registry = Registry::new();
        let mut peers = Vec::new();
        for _ in 0..5 {
            let (conn, peer) = member();
            registry.register(conn);
            peers.push(peer);
        }

        let frame = Frame::text(r#"{"latitude":1,"longitude":2}"#);
        let delivery = registry.broadcast(&frame, None).await;
        assert_eq!(delivery, Delivery { delivered: 5, evicted: 0 });

        for peer in &mut peers {
            assert_eq!(peer.try_recv(), Some(frame.clone()));
            assert_eq!(peer.try_recv(), None);
        }
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = Registry::new();
        let (a, mut pa) = member();
        let (b, mut pb) = member();
        registry.register(Arc::clone(&a));
        registry.register(b);

        let frame = Frame::text("x");
        let delivery = registry.broadcast(&frame, Some(a.id())).await;

        assert_eq!(delivery.delivered, 1);
        assert_eq!(pa.try_recv(), None);
        assert_eq!(pb.try_recv(), Some(frame));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let registry = Registry::new();
        assert_eq!(
            registry.broadcast(&Frame::text("x"), None).await,
            Delivery::default()
        );
    }

    #[tokio::test]
    async fn test_failed_peer_evicted_others_delivered() {
        let registry = Registry::new();
        let (a, mut pa) = member();
        let (b, pb) = member();
        let (c, mut pc) = member();
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));
        registry.register(Arc::clone(&c));

        drop(pb);

        let frame = Frame::text("y");
        let delivery = registry.broadcast(&frame, None).await;
        assert_eq!(delivery, Delivery { delivered: 2, evicted: 1 });

        assert_eq!(pa.try_recv(), Some(frame.clone()));
        assert_eq!(pc.try_recv(), Some(frame));
        assert!(!registry.contains(b.id()));
        assert!(!b.is_open());
        assert_eq!(registry.len(), 2);

        // The next broadcast no longer sees the evicted peer.
        let delivery = registry.broadcast(&Frame::text("z"), None).await;
        assert_eq!(delivery, Delivery { delivered: 2, evicted: 0 });
    }

    #[tokio::test]
    async fn test_stalled_peer_evicted_after_send_timeout() {
        let registry = Registry::with_send_timeout(Some(Duration::from_millis(50)));
        let (slow, _slow_peer) = MemoryConnection::pair_with_capacity(1);
        let slow: Arc<dyn Connection> = Arc::new(slow);
        let (fast, mut fast_peer) = member();
        registry.register(Arc::clone(&slow));
        registry.register(fast);

        // Fills the slow peer's only slot.
        let first = registry.broadcast(&Frame::text("1"), None).await;
        assert_eq!(first.delivered, 2);

        let second = registry.broadcast(&Frame::text("2"), None).await;
        assert_eq!(second, Delivery { delivered: 1, evicted: 1 });
        assert!(!registry.contains(slow.id()));

        assert_eq!(fast_peer.try_recv(), Some(Frame::text("1")));
        assert_eq!(fast_peer.try_recv(), Some(Frame::text("2")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_deregister() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();

        for i in 0..64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (conn, peer) = MemoryConnection::pair();
                let conn: Arc<dyn Connection> = Arc::new(conn);
                registry.register(Arc::clone(&conn));
                tokio::task::yield_now().await;
                // Odd tasks leave again, even tasks stay.
                if i % 2 == 1 {
                    registry.deregister(conn.id());
                }
                (conn.id().clone(), peer)
            }));
        }

        let mut stayed = Vec::new();
        for (i, task) in tasks.into_iter().enumerate() {
            let (id, peer) = task.await.unwrap();
            if i % 2 == 0 {
                stayed.push((id, peer));
            }
        }

        assert_eq!(registry.len(), 32);
        for (id, _) in &stayed {
            assert!(registry.contains(id));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast_during_deregister_delivers_at_most_once() {
        for _ in 0..50 {
            let registry = Arc::new(Registry::new());
            let (c, mut pc) = member();
            let (d, mut pd) = member();
            registry.register(Arc::clone(&c));
            registry.register(d);

            let frame = Frame::text(r#"{"latitude":0,"longitude":0}"#);
            let broadcaster = {
                let registry = Arc::clone(&registry);
                let frame = frame.clone();
                tokio::spawn(async move { registry.broadcast(&frame, None).await })
            };
            let leaver = {
                let registry = Arc::clone(&registry);
                let id = c.id().clone();
                tokio::spawn(async move { registry.deregister(&id) })
            };
            broadcaster.await.unwrap();
            leaver.await.unwrap();

            // Either whole or absent, never twice.
            if let Some(got) = pc.try_recv() {
                assert_eq!(got, frame);
            }
            assert_eq!(pc.try_recv(), None);
            assert_eq!(pd.try_recv(), Some(frame));
            assert!(!registry.contains(c.id()));
        }
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = Registry::new();
        let (a, mut pa) = member();
        let (b, mut pb) = member();
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));

        assert_eq!(registry.close_all().await, 2);
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert_eq!(pa.recv().await, None);
        assert_eq!(pb.recv().await, None);
    }
}

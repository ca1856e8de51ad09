//! In-process connection pair.
//!
//! A [`MemoryConnection`] behaves like any other handle from the hub's point
//! of view. Its remote end, [`MemoryPeer`], is driven directly by the code
//! that created the pair. Dropping the peer breaks the transport: pending
//! and future `recv` calls fail, and `send` fails once the peer's inbox is
//! gone.

use async_trait::async_trait;
use locastream_protocol::Frame;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, watch};

use crate::traits::{Connection, ConnectionId, TransportError};
use crate::ws::wait_closed;

/// Default number of frames buffered in each direction.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Hub-side end of an in-memory pair.
pub struct MemoryConnection {
    id: ConnectionId,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Frame>>,
    closed: watch::Sender<bool>,
}

/// Remote end of an in-memory pair.
pub struct MemoryPeer {
    tx: Option<mpsc::Sender<Frame>>,
    rx: mpsc::Receiver<Frame>,
}

impl MemoryConnection {
    /// Create a connected pair with the default buffer size.
    #[must_use]
    pub fn pair() -> (Self, MemoryPeer) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a connected pair buffering at most `capacity` frames per
    /// direction. Sends towards a peer that is not reading block once the
    /// buffer is full.
    #[must_use]
    pub fn pair_with_capacity(capacity: usize) -> (Self, MemoryPeer) {
        let (to_peer, from_hub) = mpsc::channel(capacity);
        let (to_hub, from_peer) = mpsc::channel(capacity);
        let (closed, _) = watch::channel(false);

        let conn = Self {
            id: ConnectionId::generate(),
            outbound: Mutex::new(Some(to_peer)),
            inbound: tokio::sync::Mutex::new(from_peer),
            closed,
        };
        let peer = MemoryPeer {
            tx: Some(to_hub),
            rx: from_hub,
        };
        (conn, peer)
    }

    fn outbound(&self) -> Option<mpsc::Sender<Frame>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;

        tokio::select! {
            biased;
            () = wait_closed(&mut closed) => Err(TransportError::ConnectionClosed),
            frame = inbound.recv() => frame.ok_or(TransportError::ConnectionClosed),
        }
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.outbound().ok_or(TransportError::ConnectionClosed)?;
        let mut closed = self.closed.subscribe();

        tokio::select! {
            biased;
            () = wait_closed(&mut closed) => Err(TransportError::ConnectionClosed),
            result = tx.send(frame) => {
                result.map_err(|_| TransportError::SendFailed("peer dropped".into()))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        // Dropping the sender lets the peer observe the close.
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

impl MemoryPeer {
    /// Send a frame to the hub side.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer hung up or the hub side is gone.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("connection dropped".into()))
    }

    /// Wait for the next frame from the hub side.
    ///
    /// Returns `None` once the hub side has closed and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Take a buffered frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Stop sending. The hub side's `recv` fails once the buffer drains.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }
}

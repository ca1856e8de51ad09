//! WebSocket-backed connection handles.
//!
//! [`WsConnection`] wraps any socket that is both a `Stream` of messages and
//! a `Sink` for them. The socket is split so the read and write halves can
//! be driven by different tasks at the same time.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use locastream_protocol::Frame;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace};

use crate::traits::{Connection, ConnectionId, TransportError};

/// How long `close` waits for the close handshake to be flushed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// What the hub should do with one incoming WebSocket message.
#[derive(Debug)]
pub enum Inbound {
    /// A data frame.
    Frame(Frame),
    /// Ping or pong; the WebSocket library answers these on its own.
    Control,
    /// The peer sent a close frame.
    Close,
}

/// Mapping between a WebSocket library's message type and [`Frame`].
pub trait WireMessage: Send + Unpin + 'static {
    /// Classify an incoming message.
    fn into_inbound(self) -> Inbound;

    /// Build an outgoing message from a frame.
    fn from_frame(frame: Frame) -> Self;
}

impl WireMessage for axum::extract::ws::Message {
    fn into_inbound(self) -> Inbound {
        use axum::extract::ws::Message;

        match self {
            Message::Text(text) => Inbound::Frame(Frame::from(text)),
            Message::Binary(data) => Inbound::Frame(Frame::from(data)),
            Message::Ping(_) | Message::Pong(_) => Inbound::Control,
            Message::Close(_) => Inbound::Close,
        }
    }

    fn from_frame(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Self::Text(text.to_string()),
            Frame::Binary(data) => Self::Binary(data.to_vec()),
        }
    }
}

/// Connection handle for an axum WebSocket.
pub type AxumConnection =
    WsConnection<axum::extract::ws::WebSocket, axum::extract::ws::Message>;

/// A full-duplex connection over a split WebSocket.
pub struct WsConnection<S, M>
where
    S: Stream + Sink<M>,
{
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    sink: Mutex<SplitSink<S, M>>,
    stream: Mutex<SplitStream<S>>,
    closed: watch::Sender<bool>,
    // Set once the sink has been closed. Separate from `closed`, which a
    // peer close frame also sets while the close reply is still queued.
    sink_closed: AtomicBool,
}

impl<S, M> WsConnection<S, M>
where
    S: Stream + Sink<M>,
{
    /// Wrap an established WebSocket.
    #[must_use]
    pub fn new(socket: S, remote_addr: Option<SocketAddr>) -> Self {
        let (sink, stream) = socket.split();
        let (closed, _) = watch::channel(false);

        Self {
            id: ConnectionId::generate(),
            remote_addr,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed,
            sink_closed: AtomicBool::new(false),
        }
    }

    /// Flag the connection closed, waking any pending `recv` or `send`.
    fn mark_closed(&self) {
        self.closed.send_replace(true);
    }
}

/// Resolves once the closed flag is set.
pub(crate) async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

#[async_trait]
impl<S, M, E> Connection for WsConnection<S, M>
where
    S: Stream<Item = Result<M, E>> + Sink<M, Error = E> + Send + 'static,
    M: WireMessage,
    E: Display + Send + 'static,
{
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut stream = self.stream.lock().await;

        loop {
            let next = tokio::select! {
                biased;
                () = wait_closed(&mut closed) => return Err(TransportError::ConnectionClosed),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(message)) => match message.into_inbound() {
                    Inbound::Frame(frame) => return Ok(frame),
                    Inbound::Control => {
                        trace!(connection = %self.id, "Control frame");
                    }
                    Inbound::Close => {
                        debug!(connection = %self.id, "Received close frame");
                        self.mark_closed();
                        return Err(TransportError::ConnectionClosed);
                    }
                },
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.mark_closed();
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut closed = self.closed.subscribe();
        let mut sink = self.sink.lock().await;

        tokio::select! {
            biased;
            () = wait_closed(&mut closed) => Err(TransportError::ConnectionClosed),
            result = sink.send(M::from_frame(frame)) => {
                result.map_err(|e| TransportError::SendFailed(e.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_closed();
        if self.sink_closed.swap(true, Ordering::AcqRel) {
            return Ok(()); // Already closed
        }

        // Closing the sink also flushes the reply to a peer-initiated close.
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
            Ok(result) => {
                result.map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
            }
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

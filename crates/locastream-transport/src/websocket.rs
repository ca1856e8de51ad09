//! Standalone WebSocket transport.
//!
//! This module provides a WebSocket listener using tokio-tungstenite, for
//! running the hub without an HTTP framework in front of it.

use async_trait::async_trait;
use locastream_protocol::Frame;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as ProtocolConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tracing::{debug, error, info};

use crate::traits::{Connection, Transport, TransportError};
use crate::ws::{Inbound, WireMessage, WsConnection};

impl WireMessage for Message {
    fn into_inbound(self) -> Inbound {
        match self {
            Message::Text(text) => Inbound::Frame(Frame::from(text)),
            Message::Binary(data) => Inbound::Frame(Frame::from(data)),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Control,
            Message::Close(_) => Inbound::Close,
        }
    }

    fn from_frame(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.to_string()),
            Frame::Binary(data) => Message::Binary(data.to_vec()),
        }
    }
}

/// Connection handle for a tokio-tungstenite socket.
pub type TungsteniteConnection = WsConnection<WebSocketStream<TcpStream>, Message>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes, enforced by the WebSocket codec.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Arc<dyn Connection>, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let mut protocol = ProtocolConfig::default();
        protocol.max_message_size = Some(self.config.max_message_size);
        let ws_stream = accept_async_with_config(stream, Some(protocol))
            .await
            .map_err(|e| {
                error!("WebSocket handshake failed: {}", e);
                TransportError::Other(format!("WebSocket handshake failed: {}", e))
            })?;

        debug!("WebSocket handshake completed with {}", addr);

        let conn: TungsteniteConnection = WsConnection::new(ws_stream, Some(addr));
        Ok(Arc::new(conn))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

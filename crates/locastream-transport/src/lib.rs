//! # locastream-transport
//!
//! Connection handle abstraction for the locastream hub.
//!
//! The hub only needs three things from a peer: send a frame, receive a
//! frame, and close. This crate defines that contract and provides:
//!
//! - **WebSocket** - any split-able socket (axum or tokio-tungstenite)
//! - **Memory** - an in-process pair, handy for embedding and tests
//!
//! All [`Connection`] methods take `&self`, so one task can be blocked in
//! [`Connection::recv`] while others call [`Connection::send`] or
//! [`Connection::close`] on the same handle.
//!
//! ```rust,ignore
//! use locastream_transport::Connection;
//!
//! async fn echo(conn: std::sync::Arc<dyn Connection>) {
//!     while let Ok(frame) = conn.recv().await {
//!         let _ = conn.send(frame).await;
//!     }
//!     let _ = conn.close().await;
//! }
//! ```

pub mod memory;
pub mod traits;
pub mod ws;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryConnection, MemoryPeer};
pub use traits::{Connection, ConnectionId, Transport, TransportError};
pub use ws::{AxumConnection, Inbound, WireMessage, WsConnection};

#[cfg(feature = "websocket")]
pub use websocket::{TungsteniteConnection, WebSocketConfig, WebSocketTransport};

//! Per-connection receive loop and fan-out.
//!
//! Each attached connection gets its own task running [`Hub::serve`]:
//!
//! ```text
//! Attached ──▶ Receiving ──(recv error / close / timeout)──▶ Closing
//!                 │  ▲
//!                 └──┘ valid sample: broadcast, invalid: log and skip
//! ```
//!
//! Closing always deregisters and closes the handle, whatever ended the loop.

use locastream_protocol::{codec, Frame};
use locastream_transport::{Connection, ConnectionId, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::observer::{HubObserver, NoopObserver};
use crate::registry::Registry;

/// Pause after a failed accept caused by an I/O error (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Whether a producer receives its own samples back.
    pub echo_to_sender: bool,
    /// Frames larger than this are ignored.
    pub max_message_size: usize,
    /// End a session after this long without an inbound frame.
    pub read_timeout: Option<Duration>,
    /// Evict a recipient whose send takes longer than this.
    pub send_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
            max_message_size: codec::DEFAULT_MAX_PAYLOAD_SIZE,
            read_timeout: None,
            send_timeout: None,
        }
    }
}

/// Counters for one finished session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Frames received from the peer.
    pub received: u64,
    /// Frames that were valid samples and got broadcast.
    pub relayed: u64,
    /// Frames that were ignored.
    pub rejected: u64,
}

/// Keeps a connection registered for as long as it is alive, including
/// when the owning task is aborted.
struct Registration<'a> {
    registry: &'a Registry,
    id: ConnectionId,
    registered: bool,
}

impl<'a> Registration<'a> {
    fn new(registry: &'a Registry, conn: Arc<dyn Connection>) -> Self {
        let id = conn.id().clone();
        let registered = registry.register(conn);
        Self {
            registry,
            id,
            registered,
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        // Never remove an entry this session did not add.
        if self.registered {
            self.registry.deregister(&self.id);
        }
    }
}

/// The broadcast hub.
///
/// Share it behind an `Arc` and call [`Hub::serve`] once per connection.
pub struct Hub {
    registry: Registry,
    config: HubConfig,
    observer: Arc<dyn HubObserver>,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            registry: Registry::with_send_timeout(config.send_timeout),
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Attach an observer for metrics.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn HubObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Run one connection from registration to teardown.
    ///
    /// Returns when the connection fails, is closed by either side, or
    /// exceeds the read timeout. Invalid payloads are skipped and never end
    /// the session.
    pub async fn serve(&self, conn: Arc<dyn Connection>) -> SessionSummary {
        let id = conn.id().clone();
        let registration = Registration::new(&self.registry, Arc::clone(&conn));
        self.observer.connected(&id);

        debug!(connection = %id, remote = ?conn.remote_addr(), "Connection attached");

        let mut summary = SessionSummary::default();
        loop {
            let frame = match self.receive(conn.as_ref()).await {
                Ok(frame) => frame,
                Err(TransportError::ConnectionClosed) => {
                    debug!(connection = %id, "Connection closed");
                    break;
                }
                Err(e) => {
                    warn!(connection = %id, error = %e, "Receive failed");
                    break;
                }
            };

            summary.received += 1;
            self.observer.inbound(frame.len());

            if self.relay(&id, &frame).await {
                summary.relayed += 1;
            } else {
                summary.rejected += 1;
            }
        }

        drop(registration);
        if let Err(e) = conn.close().await {
            debug!(connection = %id, error = %e, "Close after session failed");
        }
        self.observer.disconnected(&id);

        debug!(
            connection = %id,
            received = summary.received,
            relayed = summary.relayed,
            rejected = summary.rejected,
            "Connection released"
        );
        summary
    }

    async fn receive(&self, conn: &dyn Connection) -> Result<Frame, TransportError> {
        match self.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, conn.recv())
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => conn.recv().await,
        }
    }

    /// Validate and fan out one frame. Returns `false` if it was ignored.
    async fn relay(&self, sender: &ConnectionId, frame: &Frame) -> bool {
        let sample = match codec::validate(frame, self.config.max_message_size) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(connection = %sender, error = %e, "Ignoring invalid payload");
                self.observer.rejected(&e);
                return false;
            }
        };

        let exclude = (!self.config.echo_to_sender).then_some(sender);
        let delivery = self.registry.broadcast(frame, exclude).await;
        self.observer.relayed(frame.len(), &delivery);

        trace!(
            connection = %sender,
            latitude = sample.latitude,
            longitude = sample.longitude,
            recipients = delivery.delivered,
            "Relayed sample"
        );
        true
    }

    /// Accept connections from `transport` forever, one task per connection.
    pub async fn run<T: Transport>(self: Arc<Self>, transport: T) {
        info!(transport = transport.name(), "Accepting connections");

        loop {
            match transport.accept().await {
                Ok(conn) => {
                    let hub = Arc::clone(&self);
                    tokio::spawn(async move {
                        hub.serve(conn).await;
                    });
                }
                Err(TransportError::Io(e)) => {
                    warn!(transport = transport.name(), error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
                Err(e) => {
                    debug!(transport = transport.name(), error = %e, "Handshake failed");
                }
            }
        }
    }

    /// Close every live connection so each session ends.
    ///
    /// Returns the number of connections that were closed.
    pub async fn shutdown(&self) -> usize {
        let closed = self.registry.close_all().await;
        info!(connections = closed, "Hub shut down");
        closed
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

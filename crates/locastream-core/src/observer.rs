//! Instrumentation hooks for the hub.

use locastream_protocol::ProtocolError;
use locastream_transport::ConnectionId;

use crate::registry::Delivery;

/// Receives notifications about hub activity.
///
/// Every method has an empty default, so implementors only override what
/// they record. Calls happen inline on connection tasks and must not block.
pub trait HubObserver: Send + Sync {
    /// A connection was registered.
    fn connected(&self, _id: &ConnectionId) {}

    /// A connection finished its session and was released.
    fn disconnected(&self, _id: &ConnectionId) {}

    /// A frame of `bytes` bytes arrived.
    fn inbound(&self, _bytes: usize) {}

    /// A frame was ignored because it is not a valid location sample.
    fn rejected(&self, _error: &ProtocolError) {}

    /// A frame of `bytes` bytes was fanned out.
    fn relayed(&self, _bytes: usize, _delivery: &Delivery) {}
}

/// Observer that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl HubObserver for NoopObserver {}

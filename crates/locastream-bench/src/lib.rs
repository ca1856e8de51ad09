//! Shared helpers for locastream benchmarks.

use locastream_core::Registry;
use locastream_protocol::{codec, Frame, Location};
use locastream_transport::{Connection, MemoryConnection, MemoryPeer};
use std::sync::Arc;

/// Register `count` in-memory viewers and return their remote ends.
///
/// Peers must be kept alive (and drained) for sends to keep succeeding.
pub fn populate(registry: &Registry, count: usize) -> Vec<MemoryPeer> {
    (0..count)
        .map(|_| {
            let (conn, peer) = MemoryConnection::pair();
            let conn: Arc<dyn Connection> = Arc::new(conn);
            registry.register(conn);
            peer
        })
        .collect()
}

/// Drop whatever has queued up on each peer.
pub fn drain(peers: &mut [MemoryPeer]) {
    for peer in peers {
        while peer.try_recv().is_some() {}
    }
}

/// The `n`th point of a synthetic route heading north-east from Dhaka.
#[must_use]
pub fn route_point(n: usize) -> Location {
    let step = n as f64 * 0.0005;
    Location::new(23.8103 + step, 90.4125 + step)
        .with_journey(n as f64 * 0.055, n as f64 / 30.0)
}

/// Encode a route point as a text frame.
#[must_use]
pub fn route_frame(n: usize) -> Frame {
    codec::encode_sample(&route_point(n)).unwrap_or_else(|_| Frame::text("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_frames_are_valid() {
        for n in [0, 1, 500] {
            let frame = route_frame(n);
            assert!(codec::validate(&frame, codec::DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
        }
    }

    #[tokio::test]
    async fn test_populate_and_drain() {
        let registry = Registry::new();
        let mut peers = populate(&registry, 4);
        assert_eq!(registry.len(), 4);

        registry.broadcast(&route_frame(0), None).await;
        drain(&mut peers);
        assert!(peers.iter_mut().all(|p| p.try_recv().is_none()));
    }
}

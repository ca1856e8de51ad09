//! Metrics collection and export for locastream.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use locastream_core::{Delivery, HubObserver};
use locastream_protocol::ProtocolError;
use locastream_transport::ConnectionId;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "locastream_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "locastream_connections_active";
    pub const MESSAGES_TOTAL: &str = "locastream_messages_total";
    pub const MESSAGES_BYTES: &str = "locastream_messages_bytes";
    pub const REJECTED_TOTAL: &str = "locastream_rejected_total";
    pub const EVICTIONS_TOTAL: &str = "locastream_evictions_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages processed");
    metrics::describe_counter!(
        names::REJECTED_TOTAL,
        "Inbound payloads ignored because they are not location samples"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections removed after a failed broadcast send"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a message.
pub fn record_message(count: usize, bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(count as u64);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment((count * bytes) as u64);
}

/// Hub observer that feeds the Prometheus recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl HubObserver for MetricsObserver {
    fn connected(&self, _id: &ConnectionId) {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
    }

    fn disconnected(&self, _id: &ConnectionId) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }

    fn inbound(&self, bytes: usize) {
        record_message(1, bytes, "inbound");
    }

    fn rejected(&self, error: &ProtocolError) {
        counter!(names::REJECTED_TOTAL, "reason" => error.kind()).increment(1);
    }

    fn relayed(&self, bytes: usize, delivery: &Delivery) {
        record_message(delivery.delivered, bytes, "outbound");
        if delivery.evicted > 0 {
            counter!(names::EVICTIONS_TOTAL).increment(delivery.evicted as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_records_into_prometheus() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let observer = MetricsObserver;
            let id = ConnectionId::new("conn-1");
            observer.connected(&id);
            observer.inbound(40);
            observer.relayed(
                40,
                &Delivery {
                    delivered: 3,
                    evicted: 1,
                },
            );
            observer.disconnected(&id);
        });

        let rendered = handle.render();
        assert!(rendered.contains("locastream_connections_total 1"));
        assert!(rendered.contains("locastream_evictions_total 1"));
        assert!(rendered.contains(r#"locastream_messages_total{direction="outbound"} 3"#));
        assert!(rendered.contains(r#"locastream_messages_bytes{direction="outbound"} 120"#));
    }
}

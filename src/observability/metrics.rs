//! Metrics collection and exposition.
//!
//! # Metrics
//! - `broker_connections_accepted_total` (counter): sockets accepted by the mux
//! - `broker_connections_matched_total` (counter): routed, by protocol
//! - `broker_connections_unmatched_total` (counter): closed without a match
//! - `broker_active_connections` (gauge): open application connections
//! - `broker_active_topics` (gauge): topics with at least one subscriber
//! - `broker_decode_errors_total` (counter): frames that failed to decode
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accepted() {
    metrics::counter!("broker_connections_accepted_total").increment(1);
}

pub fn record_matched(protocol: &'static str) {
    metrics::counter!("broker_connections_matched_total", "protocol" => protocol).increment(1);
}

pub fn record_unmatched() {
    metrics::counter!("broker_connections_unmatched_total").increment(1);
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("broker_active_connections").set(count as f64);
}

pub fn set_active_topics(count: usize) {
    metrics::gauge!("broker_active_topics").set(count as f64);
}

pub fn record_decode_error() {
    metrics::counter!("broker_decode_errors_total").increment(1);
}

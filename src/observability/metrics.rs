//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ingress_connections_total` (counter): accepted connections
//! - `ingress_active_connections` (gauge): current open connections
//! - `ingress_requests_total` (counter): responses written, by status
//! - `ingress_request_duration_seconds` (histogram): dispatch + write latency
//! - `ingress_connection_errors_total` (counter): pipeline failures, by kind
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via config

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with a scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_opened(active: u64) {
    metrics::counter!("ingress_connections_total").increment(1);
    metrics::gauge!("ingress_active_connections").set(active as f64);
}

pub fn record_connection_closed(active: u64) {
    metrics::gauge!("ingress_active_connections").set(active as f64);
}

pub fn record_request(status: u16, start_time: Instant) {
    metrics::counter!("ingress_requests_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("ingress_request_duration_seconds")
        .record(start_time.elapsed().as_secs_f64());
}

pub fn record_connection_error(kind: &'static str) {
    metrics::counter!("ingress_connection_errors_total", "kind" => kind).increment(1);
}

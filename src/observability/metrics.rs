//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_backend_evictions_total` (counter): evictions by upstream
//! - `proxy_reloads_total` (counter): start/reset attempts by outcome
//! - `proxy_live_services` (gauge): services with a bound listener
//!
//! # Design Decisions
//! - Recording is always safe; without an installed exporter it is a no-op
//! - The Prometheus endpoint runs only when an address is configured
//! - Nothing is persisted

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, backend: &str, start_time: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("backend", backend.to_string()),
    ];
    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", &labels).record(start_time.elapsed().as_secs_f64());
}

pub fn record_eviction(upstream: &str) {
    counter!("proxy_backend_evictions_total", "upstream" => upstream.to_string()).increment(1);
}

pub fn record_reload(outcome: &'static str) {
    counter!("proxy_reloads_total", "outcome" => outcome).increment(1);
}

pub fn set_live_services(count: usize) {
    gauge!("proxy_live_services").set(count as f64);
}

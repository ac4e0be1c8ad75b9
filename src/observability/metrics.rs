//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (RPS, latency, upstream health, in-flight)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-upstream and aggregate metrics
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, upstream
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_upstream_healthy` (gauge): 1=healthy, 0=excluded
//! - `gateway_upstream_in_flight` (gauge): current in-flight requests
//! - `gateway_auth_rejections_total` (counter): rejections by reason
//! - `gateway_ws_sessions_total` (counter): accepted sessions by route key

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, upstream: &str, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "upstream" => upstream.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "upstream" => upstream.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_health(domain: &str, target: &str, healthy: bool) {
    metrics::gauge!(
        "gateway_upstream_healthy",
        "domain" => domain.to_string(),
        "target" => target.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_in_flight(domain: &str, target: &str, in_flight: usize) {
    metrics::gauge!(
        "gateway_upstream_in_flight",
        "domain" => domain.to_string(),
        "target" => target.to_string()
    )
    .set(in_flight as f64);
}

pub fn record_auth_rejected(reason: &'static str) {
    metrics::counter!("gateway_auth_rejections_total", "reason" => reason).increment(1);
}

pub fn record_ws_session(route: &str) {
    metrics::counter!("gateway_ws_sessions_total", "route" => route.to_string()).increment(1);
}

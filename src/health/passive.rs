//! Passive health checking (outcome accounting of proxied requests).
//!
//! # Responsibilities
//! - Observe request outcomes
//! - Feed successes (with elapsed time) and failures to the upstream facade
//!
//! # Design Decisions
//! - 2xx, 3xx and 101 Switching Protocols are successes
//! - Any other status, connection errors and timeouts are failures

use std::time::Duration;

use axum::http::StatusCode;

use crate::load_balancer::UpstreamHealth;

/// Whether an upstream status counts as a healthy answer.
pub fn is_success(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection() || status == StatusCode::SWITCHING_PROTOCOLS
}

/// Account a completed upstream response.
pub fn record_response(
    health: &dyn UpstreamHealth,
    domain_key: &str,
    target_url: &str,
    status: StatusCode,
    elapsed: Duration,
) {
    if is_success(status) {
        health.mark_success(domain_key, target_url, elapsed);
    } else {
        tracing::debug!(domain = %domain_key, target = %target_url, status = %status, "Upstream answered with failure status");
        health.mark_failure(domain_key, target_url);
    }
}

/// Account a request that never produced a response.
pub fn record_error(health: &dyn UpstreamHealth, domain_key: &str, target_url: &str) {
    health.mark_failure(domain_key, target_url);
}

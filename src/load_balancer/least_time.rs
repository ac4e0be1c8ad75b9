//! Least response time load balancing strategy.

use std::net::IpAddr;
use std::sync::Arc;

use crate::load_balancer::{backend::Upstream, LoadBalancer};

/// Selects the upstream with the lowest rolling average response time.
/// Ties (including never-measured upstreams) go to fewer in-flight requests.
#[derive(Debug, Default)]
pub struct LeastResponseTime;

impl LoadBalancer for LeastResponseTime {
    fn next_server(&self, upstreams: &[Arc<Upstream>], _client_ip: IpAddr) -> Option<Arc<Upstream>> {
        upstreams
            .iter()
            .min_by(|a, b| {
                a.avg_response_ms()
                    .total_cmp(&b.avg_response_ms())
                    .then_with(|| a.active_connections().cmp(&b.active_connections()))
            })
            .cloned()
    }
}

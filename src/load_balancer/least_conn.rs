//! Least Connections load balancing strategy.

use std::net::IpAddr;
use std::sync::Arc;

use crate::load_balancer::{backend::Upstream, LoadBalancer};

/// Least connections selector.
/// Selects the upstream with the minimum number of in-flight requests.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, upstreams: &[Arc<Upstream>], _client_ip: IpAddr) -> Option<Arc<Upstream>> {
        // In case of tie, the first one is selected (stability)
        upstreams
            .iter()
            .min_by_key(|u| u.active_connections())
            .cloned()
    }
}

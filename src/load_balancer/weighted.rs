//! Weighted random load balancing strategy.

use std::net::IpAddr;
use std::sync::Arc;

use rand::Rng;

use crate::load_balancer::{backend::Upstream, LoadBalancer};

/// Picks an upstream with probability proportional to its weight.
/// Zero-weight upstreams are never chosen.
#[derive(Debug, Default)]
pub struct Weighted;

impl Weighted {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for Weighted {
    fn next_server(&self, upstreams: &[Arc<Upstream>], _client_ip: IpAddr) -> Option<Arc<Upstream>> {
        let total: u64 = upstreams.iter().map(|u| u64::from(u.weight)).sum();
        if total == 0 {
            return None;
        }

        let mut point = rand::thread_rng().gen_range(0..total);
        for upstream in upstreams {
            let weight = u64::from(upstream.weight);
            if point < weight {
                return Some(upstream.clone());
            }
            point -= weight;
        }
        None
    }
}

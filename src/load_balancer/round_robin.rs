//! Round-robin load balancing strategy.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::Upstream, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through the healthy upstreams.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, upstreams: &[Arc<Upstream>], _client_ip: IpAddr) -> Option<Arc<Upstream>> {
        if upstreams.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % upstreams.len();
        Some(upstreams[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use url::Url;

    fn upstreams(n: usize) -> Vec<Arc<Upstream>> {
        (0..n)
            .map(|i| {
                let url = Url::parse(&format!("http://127.0.0.1:{}", 8080 + i)).unwrap();
                Arc::new(Upstream::new("example.com", url, 1))
            })
            .collect()
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let backends = upstreams(2);

        let s1 = lb.next_server(&backends, ip).unwrap();
        assert_eq!(s1.url, backends[0].url);

        let s2 = lb.next_server(&backends, ip).unwrap();
        assert_eq!(s2.url, backends[1].url);

        let s3 = lb.next_server(&backends, ip).unwrap();
        assert_eq!(s3.url, backends[0].url);
    }

    #[test]
    fn distribution_is_within_one() {
        let lb = RoundRobin::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let backends = upstreams(3);
        let mut counts: HashMap<String, usize> = HashMap::new();

        for _ in 0..1000 {
            let chosen = lb.next_server(&backends, ip).unwrap();
            *counts.entry(chosen.url.clone()).or_default() += 1;
        }

        for count in counts.values() {
            assert!(*count == 333 || *count == 334, "count {count}");
        }
    }
}

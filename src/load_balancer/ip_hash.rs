//! Client-IP affinity strategies.
//!
//! - `IpHash`: hash of the client IP modulo the healthy set size
//! - `ConsistentHash`: hash ring with virtual nodes; removing one upstream
//!   only remaps the clients it owned

use std::net::IpAddr;
use std::sync::Arc;

use crate::load_balancer::{backend::Upstream, stable_hash, LoadBalancer};

fn ip_key(ip: IpAddr) -> u64 {
    match ip {
        IpAddr::V4(v4) => stable_hash(&v4.octets()),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => stable_hash(&v4.octets()),
            None => stable_hash(&v6.octets()),
        },
    }
}

#[derive(Debug, Default)]
pub struct IpHash;

impl LoadBalancer for IpHash {
    fn next_server(&self, upstreams: &[Arc<Upstream>], client_ip: IpAddr) -> Option<Arc<Upstream>> {
        if upstreams.is_empty() {
            return None;
        }
        let index = (ip_key(client_ip) % upstreams.len() as u64) as usize;
        Some(upstreams[index].clone())
    }
}

#[derive(Debug, Default)]
pub struct ConsistentHash;

impl LoadBalancer for ConsistentHash {
    fn next_server(&self, upstreams: &[Arc<Upstream>], client_ip: IpAddr) -> Option<Arc<Upstream>> {
        let key = ip_key(client_ip);

        // The owner is the ring point reached first walking clockwise from key.
        upstreams
            .iter()
            .filter_map(|upstream| {
                let points = &upstream.ring_points;
                let next = match points.binary_search(&key) {
                    Ok(i) => points[i],
                    Err(i) if i < points.len() => points[i],
                    Err(_) => *points.first()?,
                };
                Some((next.wrapping_sub(key), upstream))
            })
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, upstream)| upstream.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn upstreams(n: usize) -> Vec<Arc<Upstream>> {
        (0..n)
            .map(|i| {
                let url = Url::parse(&format!("http://10.1.0.{}:80", i + 1)).unwrap();
                Arc::new(Upstream::new("d", url, 1))
            })
            .collect()
    }

    fn client(i: u32) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::from(0xC0A8_0000 + i))
    }

    #[test]
    fn ip_hash_is_sticky() {
        let lb = IpHash;
        let backends = upstreams(3);
        for i in 0..50 {
            let first = lb.next_server(&backends, client(i)).unwrap();
            let second = lb.next_server(&backends, client(i)).unwrap();
            assert_eq!(first.url, second.url);
        }
    }

    #[test]
    fn mapped_ipv6_hashes_like_ipv4() {
        let v4: IpAddr = "192.0.2.10".parse().unwrap();
        let mapped: IpAddr = "::ffff:192.0.2.10".parse().unwrap();
        assert_eq!(ip_key(v4), ip_key(mapped));
    }

    #[test]
    fn consistent_hash_only_remaps_removed_owner() {
        let lb = ConsistentHash;
        let all = upstreams(4);
        let reduced: Vec<_> = all.iter().filter(|u| u.url != all[2].url).cloned().collect();

        for i in 0..200 {
            let before = lb.next_server(&all, client(i)).unwrap();
            let after = lb.next_server(&reduced, client(i)).unwrap();
            if before.url != all[2].url {
                assert_eq!(before.url, after.url, "client {i} moved needlessly");
            }
        }
    }

    #[test]
    fn consistent_hash_spreads_clients() {
        let lb = ConsistentHash;
        let all = upstreams(3);
        let mut seen = std::collections::HashSet::new();
        for i in 0..300 {
            seen.insert(lb.next_server(&all, client(i)).unwrap().url.clone());
        }
        assert_eq!(seen.len(), 3);
    }
}

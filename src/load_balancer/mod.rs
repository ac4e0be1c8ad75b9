//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Domain resolved → domain key identified
//!     → pool.rs (healthy upstreams for the domain)
//!     → Apply load balancing policy:
//!         - round_robin.rs (rotate through healthy upstreams)
//!         - weighted.rs (random, proportional to weight)
//!         - least_conn.rs (fewest in-flight requests)
//!         - ip_hash.rs (ip-hash / consistent-hash on client IP)
//!         - least_time.rs (lowest rolling response time)
//!     → backend.rs (per-upstream counters)
//!     → Return upstream or none (502)
//! ```
//!
//! # Design Decisions
//! - Policies are stateless apart from the round-robin cursor
//! - Upstream stats keyed by (domain, target url), shared across reloads
//! - Unhealthy upstreams excluded from selection before the policy runs

pub mod backend;
pub mod ip_hash;
pub mod least_conn;
pub mod least_time;
pub mod pool;
pub mod round_robin;
pub mod weighted;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use backend::{HealthState, Upstream};
pub use pool::UpstreamSelector;

/// Upstream selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancePolicy {
    #[default]
    RoundRobin,
    Weighted,
    LeastConnections,
    IpHash,
    ConsistentHash,
    LeastResponseTime,
}

impl fmt::Display for LoadBalancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadBalancePolicy::RoundRobin => "round-robin",
            LoadBalancePolicy::Weighted => "weighted",
            LoadBalancePolicy::LeastConnections => "least-connections",
            LoadBalancePolicy::IpHash => "ip-hash",
            LoadBalancePolicy::ConsistentHash => "consistent-hash",
            LoadBalancePolicy::LeastResponseTime => "least-response-time",
        };
        f.write_str(name)
    }
}

/// A selection strategy over an already-filtered set of healthy upstreams.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    fn next_server(&self, upstreams: &[Arc<Upstream>], client_ip: IpAddr) -> Option<Arc<Upstream>>;
}

/// Facade consumed by the proxy: selection plus per-request accounting.
pub trait UpstreamHealth: Send + Sync {
    /// Choose a healthy target for the domain, or `None` when none is available.
    fn select_upstream(
        &self,
        domain_key: &str,
        policy: LoadBalancePolicy,
        client_ip: IpAddr,
    ) -> Option<Arc<Upstream>>;

    fn increment_connections(&self, domain_key: &str, target_url: &str);

    fn decrement_connections(&self, domain_key: &str, target_url: &str);

    /// Reset the failure streak and fold `elapsed` into the rolling average.
    fn mark_success(&self, domain_key: &str, target_url: &str, elapsed: Duration);

    /// Extend the failure streak; reaching the threshold excludes the target.
    fn mark_failure(&self, domain_key: &str, target_url: &str);
}

/// FNV-1a, stable across processes and toolchains.
pub(crate) fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

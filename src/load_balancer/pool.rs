//! Upstream pool management.
//!
//! # Responsibilities
//! - Manage the upstream set of every domain with explicit targets
//! - Apply the domain's load balancing policy to healthy upstreams
//! - Account in-flight requests, successes and failures per upstream
//! - Rebuild pools on reload without losing stats of surviving targets

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use url::Url;

use crate::config::{DomainConfig, HealthCheckConfig};
use crate::load_balancer::{
    backend::{join_path, Upstream},
    ip_hash::{ConsistentHash, IpHash},
    least_conn::LeastConnections,
    least_time::LeastResponseTime,
    round_robin::RoundRobin,
    weighted::Weighted,
    LoadBalancePolicy, LoadBalancer, UpstreamHealth,
};
use crate::observability::metrics;

type UpstreamKey = (String, String);

/// The upstreams of one domain plus its round-robin cursor.
#[derive(Debug)]
struct UpstreamPool {
    upstreams: Vec<Arc<Upstream>>,
    round_robin: RoundRobin,
}

impl UpstreamPool {
    fn balancer(&self, policy: LoadBalancePolicy) -> &dyn LoadBalancer {
        match policy {
            LoadBalancePolicy::RoundRobin => &self.round_robin,
            LoadBalancePolicy::Weighted => &Weighted,
            LoadBalancePolicy::LeastConnections => &LeastConnections,
            LoadBalancePolicy::IpHash => &IpHash,
            LoadBalancePolicy::ConsistentHash => &ConsistentHash,
            LoadBalancePolicy::LeastResponseTime => &LeastResponseTime,
        }
    }
}

/// Selects upstreams and tracks their health.
#[derive(Debug)]
pub struct UpstreamSelector {
    /// Domain key → pool. Replaced wholesale on reload.
    pools: ArcSwap<HashMap<String, Arc<UpstreamPool>>>,
    /// (domain key, target url) → shared upstream state.
    upstreams: DashMap<UpstreamKey, Arc<Upstream>>,
    max_failures: AtomicU32,
}

impl UpstreamSelector {
    /// Create a selector for the configured domains.
    pub fn new(domains: &[DomainConfig], health: &HealthCheckConfig) -> Self {
        let selector = Self {
            pools: ArcSwap::from_pointee(HashMap::new()),
            upstreams: DashMap::new(),
            max_failures: AtomicU32::new(health.max_failures.max(1)),
        };
        selector.sync(domains, health);
        selector
    }

    /// Rebuild every pool from configuration and swap them in atomically.
    ///
    /// Upstreams whose (domain, url) key survives keep their counters.
    pub fn sync(&self, domains: &[DomainConfig], health: &HealthCheckConfig) {
        self.max_failures
            .store(health.max_failures.max(1), Ordering::Relaxed);

        let mut pools = HashMap::new();
        for domain in domains.iter().filter(|d| d.has_targets()) {
            let specs = domain.targets();
            let single = specs.len() == 1;
            let mut upstreams = Vec::new();
            for spec in specs {
                match parse_target(&spec.url) {
                    Ok(base_url) => {
                        let probe = probe_url(
                            &base_url,
                            domain.health_url.as_deref(),
                            single,
                            &health.path,
                        );
                        let upstream =
                            self.upstream_entry(&domain.domain, base_url, spec.weight, probe);
                        if !upstreams.iter().any(|u: &Arc<Upstream>| u.url == upstream.url) {
                            upstreams.push(upstream);
                        }
                    }
                    Err(reason) => {
                        tracing::error!(
                            domain = %domain.domain,
                            target = %spec.url,
                            reason,
                            "Invalid upstream target, dropped from pool"
                        );
                    }
                }
            }

            tracing::debug!(
                domain = %domain.domain,
                policy = %domain.load_balance,
                upstreams = upstreams.len(),
                "Upstream pool built"
            );
            pools.insert(
                domain.domain.clone(),
                Arc::new(UpstreamPool {
                    upstreams,
                    round_robin: RoundRobin::new(),
                }),
            );
        }

        // Drop stats for targets that are no longer configured.
        self.upstreams.retain(|(domain, url), _| {
            pools
                .get(domain)
                .is_some_and(|pool| pool.upstreams.iter().any(|u| &u.url == url))
        });

        self.pools.store(Arc::new(pools));
    }

    fn upstream_entry(
        &self,
        domain: &str,
        base_url: Url,
        weight: u32,
        probe: Url,
    ) -> Arc<Upstream> {
        let url = base_url.as_str().trim_end_matches('/').to_string();
        let entry = self
            .upstreams
            .entry((domain.to_string(), url))
            .or_insert_with(|| {
                Arc::new(Upstream::new(domain, base_url.clone(), weight).with_health_url(probe.clone()))
            });
        let existing = entry.value().clone();
        if existing.weight == weight && existing.health_url == probe {
            existing
        } else {
            // Descriptor changed: fresh entry, stats are not carried over.
            let replacement =
                Arc::new(Upstream::new(domain, base_url, weight).with_health_url(probe));
            drop(entry);
            self.upstreams
                .insert((domain.to_string(), replacement.url.clone()), replacement.clone());
            replacement
        }
    }

    fn lookup(&self, domain_key: &str, target_url: &str) -> Option<Arc<Upstream>> {
        let key = (domain_key.to_string(), target_url.trim_end_matches('/').to_string());
        self.upstreams.get(&key).map(|entry| entry.value().clone())
    }

    /// Current exclusion threshold.
    pub fn max_failures(&self) -> u32 {
        self.max_failures.load(Ordering::Relaxed)
    }

    /// All upstreams of a domain, healthy or not.
    pub fn domain_upstreams(&self, domain_key: &str) -> Vec<Arc<Upstream>> {
        self.pools
            .load()
            .get(domain_key)
            .map(|pool| pool.upstreams.clone())
            .unwrap_or_default()
    }

    /// Return every (domain, upstreams) pair (for health checking).
    pub fn all_pools(&self) -> Vec<(String, Vec<Arc<Upstream>>)> {
        let mut pools: Vec<_> = self
            .pools
            .load()
            .iter()
            .map(|(domain, pool)| (domain.clone(), pool.upstreams.clone()))
            .collect();
        pools.sort_by(|a, b| a.0.cmp(&b.0));
        pools
    }

    /// Health probe succeeded.
    pub fn probe_succeeded(&self, upstream: &Upstream) {
        if upstream.mark_success(self.max_failures()) {
            tracing::info!(domain = %upstream.domain, target = %upstream.url, "Upstream restored");
        }
        metrics::record_upstream_health(&upstream.domain, &upstream.url, true);
    }

    /// Health probe failed.
    pub fn probe_failed(&self, upstream: &Upstream) {
        self.record_failure(upstream);
    }

    fn record_failure(&self, upstream: &Upstream) {
        let max_failures = self.max_failures();
        if upstream.mark_failure(max_failures) {
            tracing::warn!(
                domain = %upstream.domain,
                target = %upstream.url,
                failures = max_failures,
                "Upstream excluded after consecutive failures"
            );
        }
        metrics::record_upstream_health(
            &upstream.domain,
            &upstream.url,
            upstream.is_healthy(max_failures),
        );
    }
}

impl UpstreamHealth for UpstreamSelector {
    fn select_upstream(
        &self,
        domain_key: &str,
        policy: LoadBalancePolicy,
        client_ip: IpAddr,
    ) -> Option<Arc<Upstream>> {
        let pools = self.pools.load();
        let Some(pool) = pools.get(domain_key) else {
            tracing::debug!(domain = %domain_key, "Domain has no upstream pool");
            return None;
        };

        let max_failures = self.max_failures();
        let healthy: Vec<Arc<Upstream>> = pool
            .upstreams
            .iter()
            .filter(|u| u.is_healthy(max_failures))
            .cloned()
            .collect();

        let selected = pool.balancer(policy).next_server(&healthy, client_ip);
        if selected.is_none() {
            tracing::debug!(
                domain = %domain_key,
                upstream_count = pool.upstreams.len(),
                "No healthy upstreams found in pool"
            );
            for u in &pool.upstreams {
                tracing::debug!(target = %u.url, failures = u.consecutive_failures(), "Upstream status");
            }
        }
        selected
    }

    fn increment_connections(&self, domain_key: &str, target_url: &str) {
        if let Some(upstream) = self.lookup(domain_key, target_url) {
            let in_flight = upstream.inc_connections();
            metrics::record_in_flight(domain_key, &upstream.url, in_flight);
        }
    }

    fn decrement_connections(&self, domain_key: &str, target_url: &str) {
        if let Some(upstream) = self.lookup(domain_key, target_url) {
            let in_flight = upstream.dec_connections();
            metrics::record_in_flight(domain_key, &upstream.url, in_flight);
        }
    }

    fn mark_success(&self, domain_key: &str, target_url: &str, elapsed: Duration) {
        if let Some(upstream) = self.lookup(domain_key, target_url) {
            upstream.record_response(elapsed);
            if upstream.mark_success(self.max_failures()) {
                tracing::info!(domain = %domain_key, target = %upstream.url, "Upstream restored");
                metrics::record_upstream_health(domain_key, &upstream.url, true);
            }
        }
    }

    fn mark_failure(&self, domain_key: &str, target_url: &str) {
        if let Some(upstream) = self.lookup(domain_key, target_url) {
            self.record_failure(&upstream);
        }
    }
}

/// Only plain HTTP upstreams are supported by the forwarding client.
fn parse_target(raw: &str) -> Result<Url, &'static str> {
    let url = Url::parse(raw.trim()).map_err(|_| "unparsable URL")?;
    if url.scheme() != "http" {
        return Err("unsupported scheme (expected http)");
    }
    if url.host_str().is_none() {
        return Err("missing host");
    }
    Ok(url)
}

/// Resolve the probe URL of one target.
///
/// A configured path is appended to every target. An absolute URL is used
/// verbatim for single-target domains; with several targets only its path
/// and query are kept, so each target is probed on its own authority.
fn probe_url(base: &Url, health_url: Option<&str>, single: bool, default_path: &str) -> Url {
    let Some(raw) = health_url.map(str::trim).filter(|h| !h.is_empty()) else {
        return join_path(base, default_path);
    };
    match Url::parse(raw) {
        Ok(absolute) if single => absolute,
        Ok(absolute) => {
            let mut path = absolute.path().to_string();
            if let Some(query) = absolute.query() {
                path.push('?');
                path.push_str(query);
            }
            join_path(base, &path)
        }
        Err(_) => join_path(base, raw),
    }
}

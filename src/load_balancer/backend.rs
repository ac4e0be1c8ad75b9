//! Upstream abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream target of a domain
//! - Track in-flight requests (for least-connections)
//! - Track the consecutive failure streak (health)
//! - Track a rolling average response time (for least-response-time)

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use url::Url;

use crate::load_balancer::stable_hash;

/// Smoothing factor of the response time moving average.
const EMA_ALPHA: f64 = 0.3;

/// Points per upstream on the consistent-hash ring.
pub const VIRTUAL_NODES: usize = 64;

/// Health State enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// A single upstream target.
#[derive(Debug)]
pub struct Upstream {
    /// Domain key this upstream belongs to.
    pub domain: String,
    /// Target URL as configured.
    pub url: String,
    /// Parsed base URL.
    pub base_url: Url,
    /// Weight for the weighted policy.
    pub weight: u32,
    /// Sorted hash ring points.
    pub ring_points: Vec<u64>,
    /// Health probe URL.
    pub health_url: Url,

    /// Number of currently in-flight requests.
    active_connections: AtomicUsize,
    /// Consecutive failure count.
    consecutive_failures: AtomicU32,
    /// Rolling average response time in milliseconds (f64 bits).
    avg_response_ms: AtomicU64,
    /// Completed request count.
    completed: AtomicU64,
}

impl Upstream {
    /// Create a new upstream.
    pub fn new(domain: impl Into<String>, base_url: Url, weight: u32) -> Self {
        let url = base_url.as_str().trim_end_matches('/').to_string();
        let mut ring_points: Vec<u64> = (0..VIRTUAL_NODES)
            .map(|i| stable_hash(format!("{url}#{i}").as_bytes()))
            .collect();
        ring_points.sort_unstable();
        let health_url = join_path(&base_url, "/health");

        Self {
            domain: domain.into(),
            url,
            base_url,
            weight,
            ring_points,
            health_url,
            active_connections: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            avg_response_ms: AtomicU64::new(0f64.to_bits()),
            completed: AtomicU64::new(0),
        }
    }

    /// Override the probe URL.
    pub fn with_health_url(mut self, health_url: Url) -> Self {
        self.health_url = health_url;
        self
    }

    /// Get the current number of in-flight requests.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Increment in-flight count.
    pub fn inc_connections(&self) -> usize {
        self.active_connections.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement in-flight count, saturating at zero.
    pub fn dec_connections(&self) -> usize {
        let previous = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Rolling average response time in milliseconds (0 until measured).
    pub fn avg_response_ms(&self) -> f64 {
        f64::from_bits(self.avg_response_ms.load(Ordering::Relaxed))
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    // --- Health Logic ---

    /// Return true while the failure streak is below the threshold.
    pub fn is_healthy(&self, max_failures: u32) -> bool {
        self.consecutive_failures() < max_failures
    }

    pub fn state(&self, max_failures: u32) -> HealthState {
        if self.is_healthy(max_failures) {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }

    /// Report a success. Returns true if this restored an excluded upstream.
    pub fn mark_success(&self, max_failures: u32) -> bool {
        let previous = self.consecutive_failures.swap(0, Ordering::Relaxed);
        previous >= max_failures
    }

    /// Fold a response time into the moving average.
    pub fn record_response(&self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        let first = self.completed.fetch_add(1, Ordering::Relaxed) == 0;
        let _ = self
            .avg_response_ms
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let current = f64::from_bits(bits);
                let next = if first {
                    sample
                } else {
                    EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * current
                };
                Some(next.to_bits())
            });
    }

    /// Report a failure. Returns true exactly when the streak reaches the
    /// threshold.
    pub fn mark_failure(&self, max_failures: u32) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        failures == max_failures
    }
}

/// Append `path` (which may carry a query) to the base URL's path.
pub fn join_path(base: &Url, path: &str) -> Url {
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(query);
    url
}

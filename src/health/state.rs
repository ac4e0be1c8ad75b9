//! Health records and the cached gateway status.
//!
//! # States
//! - Healthy: at least one target of the domain answered its last probe
//! - Unhealthy: every target failed
//!
//! # Design Decisions
//! - Records are written only by the health monitor and read as snapshots
//! - The gateway's own status is refreshed at most once per cache period;
//!   the period follows configuration reloads

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use arc_swap::{ArcSwap, ArcSwapOption};
use serde::Serialize;

use crate::load_balancer::HealthState;

/// Per-domain result of the last probe round.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckRecord {
    /// Consecutive rounds in which no target answered.
    pub failures: u32,
    pub status: HealthState,
    pub healthy_targets: usize,
    pub total_targets: usize,
    /// Wall clock time of the last refresh (epoch milliseconds).
    pub checked_at_ms: u64,
    #[serde(skip)]
    pub checked_at: Instant,
}

impl HealthCheckRecord {
    /// Whether this record is younger than `cache_time`.
    pub fn is_fresh(&self, now: Instant, cache_time: Duration) -> bool {
        now.saturating_duration_since(self.checked_at) < cache_time
    }
}

/// Read-only view of the monitor's records.
#[derive(Debug, Clone, Default)]
pub struct HealthRecords {
    inner: Arc<ArcSwap<HashMap<String, HealthCheckRecord>>>,
}

impl HealthRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, HealthCheckRecord>> {
        self.inner.load_full()
    }

    pub fn get(&self, domain: &str) -> Option<HealthCheckRecord> {
        self.inner.load().get(domain).cloned()
    }

    pub(crate) fn publish(&self, records: HashMap<String, HealthCheckRecord>) {
        self.inner.store(Arc::new(records));
    }
}

/// Body of the gateway's own health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayHealth {
    pub status: &'static str,
    pub timestamp: u64,
}

#[derive(Debug)]
struct CachedHealth {
    at: Instant,
    body: GatewayHealth,
}

/// TTL cache in front of the gateway health response.
#[derive(Debug)]
pub struct HealthCache {
    ttl_ms: AtomicU64,
    cached: ArcSwapOption<CachedHealth>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_ms: AtomicU64::new(ttl.as_millis() as u64),
            cached: ArcSwapOption::empty(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    /// Change the cache period. A cached body older than the new period is
    /// recomputed on the next read.
    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_ms.store(ttl.as_millis() as u64, Ordering::Relaxed);
    }

    /// Current status, recomputed only when the cached one expired.
    pub fn current(&self) -> GatewayHealth {
        let now = Instant::now();
        if let Some(cached) = self.cached.load_full() {
            if now.saturating_duration_since(cached.at) < self.ttl() {
                return cached.body.clone();
            }
        }

        let body = GatewayHealth {
            status: "healthy",
            timestamp: epoch_millis(),
        };
        self.cached.store(Some(Arc::new(CachedHealth {
            at: now,
            body: body.clone(),
        })));
        body
    }
}

/// Milliseconds since the Unix epoch (0 if the clock is before it).
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every upstream of every pooled domain
//! - Update upstream failure streaks based on results
//! - Publish per-domain health records
//!
//! # Design Decisions
//! - Settings arrive on a watch channel; a reload can enable or disable
//!   checks, change the interval or the probe timeout without a restart

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::{broadcast, watch};
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::passive;
use crate::health::state::{epoch_millis, HealthCheckRecord, HealthRecords};
use crate::load_balancer::{HealthState, Upstream, UpstreamSelector};
use crate::resilience::{with_timeout, CallError};

pub struct HealthMonitor {
    selector: Arc<UpstreamSelector>,
    settings: watch::Receiver<HealthCheckConfig>,
    records: HealthRecords,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(
        selector: Arc<UpstreamSelector>,
        settings: watch::Receiver<HealthCheckConfig>,
        records: HealthRecords,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            selector,
            settings,
            records,
            client,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut current = self.settings.borrow_and_update().clone();
        announce(&current);
        let mut ticker = new_ticker(&current);
        let mut watching = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if current.enabled {
                        self.check_all().await;
                    }
                }
                changed = self.settings.changed(), if watching => match changed {
                    Ok(()) => {
                        let next = self.settings.borrow_and_update().clone();
                        if next.enabled != current.enabled
                            || next.interval_secs != current.interval_secs
                        {
                            announce(&next);
                            ticker = new_ticker(&next);
                        }
                        current = next;
                    }
                    Err(_) => watching = false,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one probe round over the current pools.
    pub async fn check_all(&self) {
        let settings = self.settings.borrow().clone();
        let previous = self.records.snapshot();
        let cache_time = Duration::from_secs(settings.cache_time_secs);
        let probe_timeout = Duration::from_millis(settings.timeout_ms.max(1));
        let max_failures = self.selector.max_failures();
        let mut next = HashMap::new();

        for (domain, upstreams) in self.selector.all_pools() {
            let now = Instant::now();
            let last = previous.get(&domain);
            if let Some(record) = last.filter(|r| r.is_fresh(now, cache_time)) {
                next.insert(domain, record.clone());
                continue;
            }

            let results = join_all(upstreams.iter().map(|u| self.probe(u, probe_timeout))).await;
            for (upstream, ok) in upstreams.iter().zip(&results) {
                if *ok {
                    self.selector.probe_succeeded(upstream);
                } else {
                    self.selector.probe_failed(upstream);
                }
            }

            let healthy_targets = upstreams
                .iter()
                .filter(|u| u.is_healthy(max_failures))
                .count();
            let answered = results.iter().any(|ok| *ok);
            let failures = if answered {
                0
            } else {
                last.map_or(0, |r| r.failures).saturating_add(1)
            };
            let status = if healthy_targets > 0 {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            };

            tracing::debug!(
                domain = %domain,
                healthy = healthy_targets,
                total = upstreams.len(),
                failures,
                "Health round completed"
            );
            next.insert(
                domain,
                HealthCheckRecord {
                    failures,
                    status,
                    healthy_targets,
                    total_targets: upstreams.len(),
                    checked_at_ms: epoch_millis(),
                    checked_at: Instant::now(),
                },
            );
        }

        self.records.publish(next);
    }

    async fn probe(&self, upstream: &Upstream, timeout: Duration) -> bool {
        let request = match Request::builder()
            .method("GET")
            .uri(upstream.health_url.as_str())
            .header("user-agent", "edge-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(target = %upstream.url, error = %e, "Failed to build health check request");
                return false;
            }
        };

        match with_timeout(timeout, self.client.request(request)).await {
            Ok(response) => {
                let success = passive::is_success(response.status());
                if !success {
                    tracing::warn!(
                        domain = %upstream.domain,
                        target = %upstream.url,
                        status = %response.status(),
                        "Health check failed: non-success status"
                    );
                }
                success
            }
            Err(CallError::Failed(e)) => {
                tracing::warn!(domain = %upstream.domain, target = %upstream.url, error = %e, "Health check failed: connection error");
                false
            }
            Err(CallError::TimedOut(limit)) => {
                tracing::warn!(domain = %upstream.domain, target = %upstream.url, timeout_ms = limit.as_millis() as u64, "Health check failed: timeout");
                false
            }
        }
    }
}

fn new_ticker(settings: &HealthCheckConfig) -> time::Interval {
    let mut ticker = time::interval(Duration::from_secs(settings.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    ticker
}

fn announce(settings: &HealthCheckConfig) {
    if settings.enabled {
        tracing::info!(
            interval = settings.interval_secs,
            path = %settings.path,
            max_failures = settings.max_failures,
            "Health monitor active"
        );
    } else {
        tracing::info!("Active health checks disabled");
    }
}

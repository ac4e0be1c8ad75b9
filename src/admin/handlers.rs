use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::health::HealthCheckRecord;
use crate::http::server::AppState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub domains: usize,
}

#[derive(Serialize)]
pub struct UpstreamStatus {
    pub domain: String,
    pub url: String,
    pub healthy: bool,
    pub weight: u32,
    pub in_flight: usize,
    pub consecutive_failures: u32,
    pub avg_response_ms: f64,
    pub completed: u64,
}

#[derive(Serialize)]
pub struct UpstreamReport {
    pub max_failures: u32,
    pub upstreams: Vec<UpstreamStatus>,
    pub health: HashMap<String, HealthCheckRecord>,
}

#[derive(Serialize)]
pub struct RotatedKey {
    pub api_key: String,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let inner = state.inner.load();
    Json(SystemStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
        domains: inner.domains.len(),
    })
}

pub async fn get_upstreams(State(state): State<AppState>) -> Json<UpstreamReport> {
    let max_failures = state.upstreams.max_failures();
    let upstreams = state
        .upstreams
        .all_pools()
        .into_iter()
        .flat_map(|(_, pool)| pool)
        .map(|u| UpstreamStatus {
            domain: u.domain.clone(),
            url: u.url.clone(),
            healthy: u.is_healthy(max_failures),
            weight: u.weight,
            in_flight: u.active_connections(),
            consecutive_failures: u.consecutive_failures(),
            avg_response_ms: u.avg_response_ms(),
            completed: u.completed(),
        })
        .collect();

    Json(UpstreamReport {
        max_failures,
        upstreams,
        health: state.health_records.snapshot().as_ref().clone(),
    })
}

pub async fn rotate_api_key(State(state): State<AppState>) -> Json<RotatedKey> {
    Json(RotatedKey {
        api_key: state.api_keys.rotate(),
    })
}

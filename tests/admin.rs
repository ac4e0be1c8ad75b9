//! Status, health and admin endpoints, plus live configuration reload.

use std::time::Duration;

use serde_json::Value;

mod common;

use common::{auth_config, base_config, client, domain, mock_backend, spawn_gateway, TEST_API_KEY};

#[tokio::test]
async fn status_reports_version_and_domains() {
    let mut config = base_config();
    config.domains.push(domain("a.example.com", &["http://127.0.0.1:9"]));
    config.domains.push(domain("*.b.example.com", &[]));
    let gateway = spawn_gateway(config).await;

    let body: Value = client()
        .get(gateway.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["domains"], 2);
    assert!(body["uptime_secs"].is_u64());
}

#[tokio::test]
async fn health_endpoint_is_cached() {
    let mut config = base_config();
    config.health_check.cache_time_secs = 60;
    let gateway = spawn_gateway(config).await;
    let http = client();

    let first: Value = http
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["status"], "healthy");
    assert!(first["timestamp"].as_u64().unwrap() > 1_600_000_000_000);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second: Value = http
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["timestamp"], second["timestamp"]);
}

#[tokio::test]
async fn reload_shortens_health_cache() {
    let mut config = base_config();
    config.health_check.cache_time_secs = 3600;
    let gateway = spawn_gateway(config.clone()).await;
    let http = client();

    let first: Value = http
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    config.health_check.cache_time_secs = 0;
    gateway.updates.send(config).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second: Value = http
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(second["timestamp"].as_u64().unwrap() > first["timestamp"].as_u64().unwrap());
}

#[tokio::test]
async fn reload_turns_on_active_checks() {
    let b1 = mock_backend("b1").await;
    let mut config = base_config();
    config.domains.push(domain("svc.example.com", &[&b1.url]));
    let gateway = spawn_gateway(config.clone()).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(gateway.state.health_records.get("svc.example.com").is_none());
    assert_eq!(b1.hits(), 0);

    config.health_check.enabled = true;
    config.health_check.interval_secs = 1;
    gateway.updates.send(config).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let record = gateway.state.health_records.get("svc.example.com").unwrap();
    assert_eq!(record.healthy_targets, 1);
    assert!(b1.hits() >= 1);
}

#[tokio::test]
async fn upstream_listing_requires_key() {
    let b1 = mock_backend("b1").await;
    let b2 = mock_backend("b2").await;
    let mut config = auth_config();
    config.domains.push(domain("svc.example.com", &[&b1.url, &b2.url]));
    let gateway = spawn_gateway(config).await;

    let denied = client()
        .get(gateway.url("/api/gateway/upstreams"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let body: Value = client()
        .get(gateway.url("/api/gateway/upstreams"))
        .header("x-api-key", TEST_API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["max_failures"], 3);
    let upstreams = body["upstreams"].as_array().unwrap();
    assert_eq!(upstreams.len(), 2);
    assert_eq!(upstreams[0]["domain"], "svc.example.com");
    assert_eq!(upstreams[0]["url"], b1.url.as_str());
    assert_eq!(upstreams[0]["healthy"], true);
    assert_eq!(upstreams[0]["in_flight"], 0);
    assert_eq!(upstreams[1]["url"], b2.url.as_str());
}

#[tokio::test]
async fn rotated_key_replaces_the_old_one() {
    let gateway = spawn_gateway(auth_config()).await;
    let http = client();

    let rotated: Value = http
        .post(gateway.url("/api/gateway/api-key/rotate"))
        .header("x-api-key", TEST_API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let new_key = rotated["api_key"].as_str().unwrap().to_string();
    assert_eq!(new_key.len(), 32);

    let old = http
        .get(gateway.url("/api/gateway/upstreams"))
        .header("x-api-key", TEST_API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(old.status(), 401);

    let new = http
        .get(gateway.url("/api/gateway/upstreams"))
        .header("x-api-key", &new_key)
        .send()
        .await
        .unwrap();
    assert_eq!(new.status(), 200);
}

#[tokio::test]
async fn reload_adds_and_removes_domains() {
    let b1 = mock_backend("b1").await;
    let b2 = mock_backend("b2").await;
    let mut config = base_config();
    config.domains.push(domain("old.example.com", &[&b1.url]));
    let gateway = spawn_gateway(config.clone()).await;
    let http = client();

    let before = http
        .get(gateway.url("/"))
        .header("host", "old.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(before.status(), 200);

    config.domains = vec![domain("new.example.com", &[&b2.url])];
    gateway.updates.send(config).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let gone = http
        .get(gateway.url("/"))
        .header("host", "old.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);

    let added: Value = http
        .get(gateway.url("/"))
        .header("host", "new.example.com")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(added["backend"], "b2");
    assert!(gateway
        .state
        .upstreams
        .domain_upstreams("old.example.com")
        .is_empty());
    assert_eq!(gateway.state.forwarders.len(), 1);
}

//! Forwarding, rewriting and load balancing through a running gateway.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use edge_gateway::config::RewritePath;
use edge_gateway::load_balancer::{LoadBalancePolicy, UpstreamHealth};
use serde_json::Value;

mod common;

use common::{base_config, client, domain, mock_backend, spawn_gateway, stalling_backend};

#[tokio::test]
async fn unknown_domain_returns_json_404() {
    let gateway = spawn_gateway(base_config()).await;

    let res = client()
        .get(gateway.url("/"))
        .header("host", "nowhere.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Not Found");
    assert_eq!(body["domain"], "nowhere.example.com");
}

#[tokio::test]
async fn single_target_forwarded_with_proxy_headers() {
    let backend = mock_backend("b1").await;
    let mut config = base_config();
    let mut entry = domain("api.example.com", &[&backend.url]);
    entry.headers.request = BTreeMap::from([("x-tenant".to_string(), "acme".to_string())]);
    entry.headers.response = BTreeMap::from([("x-served-by".to_string(), "edge".to_string())]);
    config.domains.push(entry);
    let gateway = spawn_gateway(config).await;

    let res = client()
        .get(gateway.url("/v1/items?page=2"))
        .header("host", "api.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-served-by"], "edge");
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["backend"], "b1");
    assert_eq!(body["uri"], "/v1/items?page=2");
    assert_eq!(body["host"], backend.addr.to_string());
    assert_eq!(body["x_forwarded_for"], "127.0.0.1");
    assert_eq!(body["x_real_ip"], "127.0.0.1");
    assert_eq!(body["x_forwarded_host"], "api.example.com");
    assert_eq!(body["x_forwarded_proto"], "http");
    assert_eq!(body["x_tenant"], "acme");
    assert!(body["x_request_id"].is_string());
}

#[tokio::test]
async fn preserve_host_header_keeps_client_host() {
    let backend = mock_backend("b1").await;
    let mut config = base_config();
    let mut entry = domain("www.example.com", &[&backend.url]);
    entry.preserve_host_header = true;
    config.domains.push(entry);
    let gateway = spawn_gateway(config).await;

    let body: Value = client()
        .get(gateway.url("/"))
        .header("host", "www.example.com")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["host"], "www.example.com");
}

#[tokio::test]
async fn wildcard_rewrite_substitutes_subdomain() {
    let backend = mock_backend("tenants").await;
    let mut config = base_config();
    let mut entry = domain("*.apps.example.com", &[&backend.url]);
    entry.rewrite_path = Some(RewritePath {
        from: "/".into(),
        to: "/tenants/{subdomain}/".into(),
    });
    config.domains.push(entry);
    let gateway = spawn_gateway(config).await;

    let body: Value = client()
        .get(gateway.url("/dashboard?tab=1"))
        .header("host", "acme.apps.example.com")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["uri"], "/tenants/acme/dashboard?tab=1");
}

#[tokio::test]
async fn exact_entry_outranks_wildcard() {
    let wild = mock_backend("wild").await;
    let exact = mock_backend("exact").await;
    let mut config = base_config();
    config.domains.push(domain("*.example.com", &[&wild.url]));
    config.domains.push(domain("api.example.com", &[&exact.url]));
    let gateway = spawn_gateway(config).await;

    for (host, expected) in [("api.example.com", "exact"), ("web.example.com", "wild")] {
        let body: Value = client()
            .get(gateway.url("/"))
            .header("host", host)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["backend"], expected, "host {host}");
    }
}

#[tokio::test]
async fn domain_without_targets_goes_to_local_app() {
    let app = mock_backend("app").await;
    let mut config = base_config();
    config.app.internal_address = app.addr.to_string();
    config.domains.push(domain("app.example.com", &[]));
    let gateway = spawn_gateway(config).await;

    let body: Value = client()
        .post(gateway.url("/submit"))
        .header("host", "app.example.com")
        .body("payload")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["backend"], "app");
    assert_eq!(body["method"], "POST");
    assert_eq!(app.hits(), 1);
}

#[tokio::test]
async fn dead_target_is_excluded_after_max_failures() {
    let dead = common::dead_address().await;
    let mut config = base_config();
    config.health_check.max_failures = 2;
    config
        .domains
        .push(domain("down.example.com", &[&format!("http://{dead}")]));
    let gateway = spawn_gateway(config).await;
    let http = client();

    for _ in 0..2 {
        let res = http
            .get(gateway.url("/"))
            .header("host", "down.example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 502);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["message"], "upstream connection error");
        assert_eq!(body["target"], format!("http://{dead}"));
    }

    let res = http
        .get(gateway.url("/"))
        .header("host", "down.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "no available upstream");
}

#[tokio::test]
async fn round_robin_spreads_evenly() {
    let b1 = mock_backend("b1").await;
    let b2 = mock_backend("b2").await;
    let b3 = mock_backend("b3").await;
    let mut config = base_config();
    config
        .domains
        .push(domain("rr.example.com", &[&b1.url, &b2.url, &b3.url]));
    let gateway = spawn_gateway(config).await;
    let http = client();

    for _ in 0..31 {
        let res = http
            .get(gateway.url("/"))
            .header("host", "rr.example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        res.bytes().await.unwrap();
    }

    for hits in [b1.hits(), b2.hits(), b3.hits()] {
        assert!(hits == 10 || hits == 11, "uneven split: {hits}");
    }
}

#[tokio::test]
async fn least_connections_avoids_busy_target() {
    let b1 = mock_backend("b1").await;
    let b2 = mock_backend("b2").await;
    let b3 = mock_backend("b3").await;
    let mut config = base_config();
    let mut entry = domain("lc.example.com", &[&b1.url, &b2.url, &b3.url]);
    entry.load_balance = LoadBalancePolicy::LeastConnections;
    config.domains.push(entry);
    let gateway = spawn_gateway(config).await;

    // Two long-lived requests already pinned on the first target.
    let upstreams = &gateway.state.upstreams;
    upstreams.increment_connections("lc.example.com", &b1.url);
    upstreams.increment_connections("lc.example.com", &b1.url);

    let http = client();
    for _ in 0..12 {
        let res = http
            .get(gateway.url("/"))
            .header("host", "lc.example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        res.bytes().await.unwrap();
    }

    assert_eq!(b1.hits(), 0);
    assert_eq!(b2.hits() + b3.hits(), 12);

    upstreams.decrement_connections("lc.example.com", &b1.url);
    upstreams.decrement_connections("lc.example.com", &b1.url);
    assert_eq!(upstreams.domain_upstreams("lc.example.com")[0].active_connections(), 0);
}

#[tokio::test]
async fn in_flight_gauge_covers_slow_response() {
    let b1 = mock_backend("b1").await;
    let mut config = base_config();
    config.domains.push(domain("slow.example.com", &[&b1.url]));
    let gateway = spawn_gateway(config).await;

    let url = gateway.url("/slow");
    let pending = tokio::spawn(async move {
        let res = client()
            .get(url)
            .header("host", "slow.example.com")
            .send()
            .await
            .unwrap();
        let status = res.status();
        res.bytes().await.unwrap();
        status
    });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let upstream = gateway.state.upstreams.domain_upstreams("slow.example.com")[0].clone();
    assert_eq!(upstream.active_connections(), 1);

    assert_eq!(pending.await.unwrap(), 200);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(upstream.active_connections(), 0);
    assert_eq!(upstream.completed(), 1);
}

#[tokio::test]
async fn upstream_timeout_returns_502() {
    let b1 = mock_backend("b1").await;
    let mut config = base_config();
    let mut entry = domain("timeout.example.com", &[&b1.url]);
    entry.timeout = Some(100);
    config.domains.push(entry);
    let gateway = spawn_gateway(config).await;

    let res = client()
        .get(gateway.url("/slow"))
        .header("host", "timeout.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 502);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "upstream timed out after 100ms");
}

#[tokio::test]
async fn timeout_covers_stalled_body() {
    let upstream_url = stalling_backend(Duration::from_secs(3)).await;
    let mut config = base_config();
    let mut entry = domain("stall.example.com", &[&upstream_url]);
    entry.timeout = Some(300);
    config.domains.push(entry);
    let gateway = spawn_gateway(config).await;

    let started = Instant::now();
    let res = client()
        .get(gateway.url("/download"))
        .header("host", "stall.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.bytes().await.is_err());
    assert!(started.elapsed() < Duration::from_millis(1500));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let upstream = gateway.state.upstreams.domain_upstreams("stall.example.com")[0].clone();
    assert_eq!(upstream.consecutive_failures(), 1);
    assert_eq!(upstream.completed(), 0);
    assert_eq!(upstream.active_connections(), 0);
}

//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    Json, Router,
};
use edge_gateway::config::{DomainConfig, GatewayConfig, TargetConfig, TargetEntry};
use edge_gateway::http::AppState;
use edge_gateway::{GatewayBuilder, Shutdown};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// API key used by tests that enable auth.
pub const TEST_API_KEY: &str = "test-key-0123456789";

#[derive(Clone)]
struct BackendState {
    name: &'static str,
    hits: Arc<AtomicUsize>,
}

/// An HTTP backend that echoes what it received as JSON.
pub struct MockBackend {
    pub url: String,
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn echo(State(state): State<BackendState>, request: Request) -> Json<Value> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if request.uri().path().starts_with("/slow") {
        tokio::time::sleep(Duration::from_millis(800)).await;
    }

    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "backend": state.name,
        "method": request.method().as_str(),
        "uri": request.uri().to_string(),
        "host": header("host"),
        "x_forwarded_for": header("x-forwarded-for"),
        "x_forwarded_host": header("x-forwarded-host"),
        "x_forwarded_proto": header("x-forwarded-proto"),
        "x_real_ip": header("x-real-ip"),
        "x_request_id": header("x-request-id"),
        "x_tenant": header("x-tenant"),
    }))
}

/// Start an echo backend on an ephemeral port.
pub async fn mock_backend(name: &'static str) -> MockBackend {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().fallback(echo).with_state(BackendState {
        name,
        hits: hits.clone(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend {
        url: format!("http://{addr}"),
        addr,
        hits,
    }
}

/// A backend that sends response headers and a first chunk, then stalls
/// for `stall` before finishing the body.
pub async fn stalling_backend(stall: Duration) -> String {
    let app = Router::new().fallback(move || async move {
        let chunks = futures_util::stream::unfold(0u8, move |step| async move {
            match step {
                0 => Some((Ok::<_, std::io::Error>("start"), 1)),
                1 => {
                    tokio::time::sleep(stall).await;
                    Some((Ok("end"), 2))
                }
                _ => None,
            }
        });
        Body::from_stream(chunks)
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A port nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Defaults with active health checks off so tests control upstream state.
pub fn base_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.health_check.enabled = false;
    config.listener.http_address = "127.0.0.1:0".into();
    config
}

pub fn domain(name: &str, targets: &[&str]) -> DomainConfig {
    let target = match targets {
        [] => None,
        [single] => Some(TargetConfig::Single(single.to_string())),
        many => Some(TargetConfig::Multiple(
            many.iter().map(|t| TargetEntry::Url(t.to_string())).collect(),
        )),
    };
    DomainConfig {
        domain: name.into(),
        target,
        ..Default::default()
    }
}

/// Config with the API key gate on and no private-network bypass.
pub fn auth_config() -> GatewayConfig {
    let mut config = base_config();
    config.auth.enabled = true;
    config.auth.api_key = TEST_API_KEY.into();
    config.auth.trust_private_networks = false;
    config
}

/// A running gateway; shuts down when dropped.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub updates: mpsc::UnboundedSender<GatewayConfig>,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    spawn_builder(GatewayBuilder::new(config)).await
}

/// Build and serve on an ephemeral port.
pub async fn spawn_builder(builder: GatewayBuilder) -> TestGateway {
    let server = builder.build().unwrap();
    let state = server.state().clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (updates, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, &server_shutdown).await;
    });

    TestGateway {
        addr,
        state,
        updates,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

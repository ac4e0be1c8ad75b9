//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with system, admin and gateway handlers
//! - Wire up middleware (auth, timeout, request ID, tracing)
//! - Serve plain HTTP and, when certificates are loaded, HTTPS with SNI
//! - Dispatch requests to the proxy or the WebSocket router
//! - Apply configuration reloads as atomic snapshot swaps
//! - Run the health monitor alongside the listeners

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::{ArcSwap, ArcSwapOption};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, Method, Request},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::{GatewayConfig, HealthCheckConfig};
use crate::health::{HealthCache, HealthMonitor, HealthRecords};
use crate::http::proxy::{self, ForwarderCache};
use crate::http::request::{is_upgrade, request_host, ListenerScheme, MakeRequestUuid, X_REQUEST_ID};
use crate::http::response::ProxyError;
use crate::http::websocket::{self, WsRegistry};
use crate::lifecycle::Shutdown;
use crate::load_balancer::UpstreamSelector;
use crate::net::tls::{load_certificates, load_tls_config, CertStore, SniResolver};
use crate::observability::metrics;
use crate::routing::matcher::normalize_host;
use crate::routing::DomainRouter;
use crate::security::{auth_middleware, ApiKeyStore, AuthPolicy};

/// Everything derived from one configuration, swapped as a unit on reload.
#[derive(Debug)]
pub struct GatewaySnapshot {
    pub config: Arc<GatewayConfig>,
    pub domains: DomainRouter,
    pub auth: AuthPolicy,
}

impl GatewaySnapshot {
    pub fn from_config(config: GatewayConfig) -> Self {
        Self {
            domains: DomainRouter::from_config(&config.domains),
            auth: AuthPolicy::from_config(&config),
            config: Arc::new(config),
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<GatewaySnapshot>>,
    pub upstreams: Arc<UpstreamSelector>,
    pub forwarders: Arc<ForwarderCache>,
    pub ws_routes: Arc<WsRegistry>,
    pub api_keys: Arc<ApiKeyStore>,
    pub certs: Arc<SniResolver>,
    pub health_cache: Arc<HealthCache>,
    pub health_records: HealthRecords,
    health_settings: Arc<watch::Sender<HealthCheckConfig>>,
    /// Address the HTTPS listener is bound to, if one is running.
    https_bound: Arc<ArcSwapOption<String>>,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig, ws_routes: WsRegistry, certs: CertStore) -> Self {
        let upstreams = Arc::new(UpstreamSelector::new(&config.domains, &config.health_check));
        let api_keys = Arc::new(ApiKeyStore::new(&config.auth.api_key));
        let health_cache = Arc::new(HealthCache::new(Duration::from_secs(
            config.health_check.cache_time_secs,
        )));
        let (health_settings, _) = watch::channel(config.health_check.clone());

        Self {
            inner: Arc::new(ArcSwap::from_pointee(GatewaySnapshot::from_config(config))),
            upstreams,
            forwarders: Arc::new(ForwarderCache::new()),
            ws_routes: Arc::new(ws_routes),
            api_keys,
            certs: Arc::new(SniResolver::new(certs)),
            health_cache,
            health_records: HealthRecords::new(),
            health_settings: Arc::new(health_settings),
            https_bound: Arc::new(ArcSwapOption::empty()),
            started: Instant::now(),
        }
    }

    /// Re-derive every snapshot from a new configuration.
    ///
    /// Each structure is replaced atomically; requests in flight finish on
    /// the snapshot they started with.
    pub fn apply_config(&self, config: GatewayConfig) {
        self.upstreams.sync(&config.domains, &config.health_check);
        self.certs.reload(load_certificates(&config.domains));
        self.api_keys.reconfigure(&config.auth.api_key);
        self.forwarders.retain_targets(&proxy::live_targets(&config));
        self.health_cache
            .set_ttl(Duration::from_secs(config.health_check.cache_time_secs));
        self.health_settings.send_replace(config.health_check.clone());

        if self.https_restart_required(&config) {
            tracing::warn!(
                address = config.listener.https_address.as_deref().unwrap_or_default(),
                certificates = self.certs.names().len(),
                "HTTPS listener not serving the configured address, restart required"
            );
        }

        let domains = config.domains.len();
        self.inner.store(Arc::new(GatewaySnapshot::from_config(config)));
        tracing::info!(domains, "Configuration reloaded");
    }

    /// Whether `config` asks for an HTTPS listener the running process lacks.
    ///
    /// Listeners are bound once at startup; certificates added by a reload
    /// are served only if HTTPS was already running on that address.
    pub fn https_restart_required(&self, config: &GatewayConfig) -> bool {
        let bound = self.https_bound.load();
        https_restart_needed(
            config.listener.https_address.as_deref(),
            !self.certs.is_empty(),
            bound.as_deref().map(String::as_str),
        )
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<GatewayConfig> {
        Arc::clone(&self.inner.load().config)
    }
}

fn https_restart_needed(wanted: Option<&str>, certs_loaded: bool, bound: Option<&str>) -> bool {
    match wanted {
        Some(address) if certs_loaded => bound != Some(address),
        _ => false,
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a server; WebSocket handlers and certificates must already be final.
    pub fn new(config: GatewayConfig, ws_routes: WsRegistry, certs: CertStore) -> Self {
        Self {
            state: AppState::new(config, ws_routes, certs),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Router for one listener.
    pub fn router(&self, scheme: ListenerScheme) -> Router {
        build_router(self.state.clone(), scheme)
    }

    /// Serve until shutdown.
    ///
    /// Configuration updates received on `config_updates` are applied live.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        shutdown: &Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.state.config();
        tracing::info!(
            address = %addr,
            domains = config.domains.len(),
            ws_routes = self.state.ws_routes.len(),
            "HTTP server starting"
        );

        let monitor = HealthMonitor::new(
            self.state.upstreams.clone(),
            self.state.health_settings.subscribe(),
            self.state.health_records.clone(),
        );
        tokio::spawn(monitor.run(shutdown.subscribe()));

        let reload_state = self.state.clone();
        let mut reload_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(new_config) => reload_state.apply_config(new_config),
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let http_app = self
            .router(ListenerScheme::Http)
            .into_make_service_with_connect_info::<SocketAddr>();
        let mut http_shutdown = shutdown.subscribe();
        let http = axum::serve(listener, http_app).with_graceful_shutdown(async move {
            let _ = http_shutdown.recv().await;
        });

        match self.tls_listener(&config, shutdown) {
            Some((https_addr, tls_config, handle)) => {
                tracing::info!(address = %https_addr, certificates = self.state.certs.names().len(), "HTTPS server starting");
                if let Some(raw) = config.listener.https_address.clone() {
                    self.state.https_bound.store(Some(Arc::new(raw)));
                }
                let https_app = self
                    .router(ListenerScheme::Https)
                    .into_make_service_with_connect_info::<SocketAddr>();
                tokio::select! {
                    result = axum_server::bind_rustls(https_addr, tls_config)
                        .handle(handle)
                        .serve(https_app) => result?,
                    result = http => result?,
                }
            }
            None => http.await?,
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn tls_listener(
        &self,
        config: &GatewayConfig,
        shutdown: &Shutdown,
    ) -> Option<(
        SocketAddr,
        axum_server::tls_rustls::RustlsConfig,
        axum_server::Handle,
    )> {
        let raw = config.listener.https_address.as_deref()?;
        if self.state.certs.is_empty() {
            tracing::warn!(address = %raw, "No certificates loaded, HTTPS listener disabled");
            return None;
        }
        let addr: SocketAddr = match raw.parse() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::error!(address = %raw, error = %e, "Invalid HTTPS address, HTTPS listener disabled");
                return None;
            }
        };
        let tls_config = match load_tls_config(self.state.certs.clone()) {
            Ok(tls) => tls,
            Err(e) => {
                tracing::error!(error = %e, "TLS setup failed, HTTPS listener disabled");
                return None;
            }
        };

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = shutdown_rx.recv().await;
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });
        Some((addr, tls_config, handle))
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
fn build_router(state: AppState, scheme: ListenerScheme) -> Router {
    let request_secs = state.config().timeouts.request_secs.max(1);
    let x_request_id = HeaderName::from_static(X_REQUEST_ID);

    Router::new()
        .route("/status", get(admin::handlers::get_status))
        .merge(admin::routes())
        .fallback(gateway_handler)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(Extension(scheme))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(request_secs)))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
}

/// Health endpoint, domain proxying and WebSocket routing.
async fn gateway_handler(
    State(state): State<AppState>,
    Extension(scheme): Extension<ListenerScheme>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let snapshot = state.inner.load_full();

    if request.method() == Method::GET && request.uri().path() == snapshot.config.health_check.path {
        return Json(state.health_cache.current()).into_response();
    }

    let host = request_host(&request).unwrap_or_default();
    let resolved = snapshot.domains.resolve(&host);
    let upgrade = is_upgrade(request.headers());

    match resolved {
        Some(resolved) if !upgrade || (resolved.config.ws && resolved.config.has_targets()) => {
            proxy::forward(&state, &snapshot, resolved, scheme, peer, request)
                .await
                .unwrap_or_else(IntoResponse::into_response)
        }
        _ if upgrade => {
            websocket::upgrade(state.ws_routes.clone(), scheme, peer, request).await
        }
        _ => {
            tracing::warn!(host = %host, remote = %peer, path = %request.uri().path(), "Domain not configured");
            metrics::record_request(request.method().as_str(), 404, "none", start);
            ProxyError::DomainNotConfigured {
                domain: normalize_host(&host),
            }
            .into_response()
        }
    }
}

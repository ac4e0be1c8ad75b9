//! Reverse proxy forwarding.
//!
//! # Responsibilities
//! - Rewrite the request path and headers for the chosen upstream
//! - Select an upstream (or the local application) and forward with a deadline
//! - Account in-flight requests, successes and failures
//! - Pass WebSocket upgrades through to upstreams when enabled
//!
//! # Design Decisions
//! - One pooled client per (domain, target) so connections are reused
//! - The in-flight guard lives as long as the response body (or the tunnel)
//! - One deadline covers both the response head and the streamed body;
//!   outcomes are accounted when the body ends
//! - No retries: one attempt, then a JSON 502
//! - Upstreams are spoken to over HTTP/1.1

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, BodyDataStream, Bytes},
    http::{header, HeaderValue, Request, Response, StatusCode, Uri, Version},
};
use dashmap::DashMap;
use axum::BoxError;
use futures_util::{stream, StreamExt};
use hyper::{
    body::{Body as HttpBody, Incoming},
    upgrade::OnUpgrade,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
};
use tokio::time::{self, Sleep};
use url::Url;

use crate::config::{GatewayConfig, RewritePath};
use crate::health::passive;
use crate::http::request::{is_upgrade, request_host, ListenerScheme};
use crate::http::response::ProxyError;
use crate::http::server::{AppState, GatewaySnapshot};
use crate::load_balancer::UpstreamHealth;
use crate::observability::metrics;
use crate::resilience::{upstream_timeout, with_timeout, CallError};
use crate::routing::ResolvedDomain;
use crate::security::headers::{apply_custom, client_ip, set_forwarded, strip_hop_by_hop};

/// Pooled client bound to one upstream base URL.
pub struct Forwarder {
    base: Url,
    client: Client<HttpConnector, Body>,
}

impl Forwarder {
    fn new(base: Url) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { base, client }
    }

    /// `host[:port]` of the upstream.
    pub fn authority(&self) -> String {
        let host = self.base.host_str().unwrap_or_default();
        match self.base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Full upstream URI for a (rewritten) path and query.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, axum::http::uri::InvalidUri> {
        format!(
            "{}://{}{}{}",
            self.base.scheme(),
            self.authority(),
            self.base.path().trim_end_matches('/'),
            path_and_query
        )
        .parse()
    }
}

/// Forwarders keyed by (domain key, target url).
#[derive(Default)]
pub struct ForwarderCache {
    entries: DashMap<(String, String), Arc<Forwarder>>,
}

impl ForwarderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached forwarder for this pair, created on first use.
    pub fn get(&self, domain_key: &str, base: &Url) -> Arc<Forwarder> {
        let key = (domain_key.to_string(), cache_key_url(base));
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::new(Forwarder::new(base.clone())))
            .value()
            .clone()
    }

    /// Drop every forwarder whose (domain key, target url) pair is not live.
    pub fn retain_targets(&self, live: &HashSet<(String, String)>) {
        self.entries.retain(|key, _| live.contains(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Holds one in-flight slot on an upstream until dropped.
struct InFlight {
    health: Arc<dyn UpstreamHealth>,
    domain: String,
    target: String,
}

impl InFlight {
    fn acquire(health: Arc<dyn UpstreamHealth>, domain: &str, target: &str) -> Self {
        health.increment_connections(domain, target);
        Self {
            health,
            domain: domain.to_string(),
            target: target.to_string(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.health.decrement_connections(&self.domain, &self.target);
    }
}

/// Replace the `from` prefix of the path with `to`, keeping the query.
pub fn rewrite_path(path_and_query: &str, rule: &RewritePath) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };

    let mut rewritten = match path.strip_prefix(rule.from.as_str()) {
        Some(rest) => {
            let to = rule.to.as_str();
            if to.ends_with('/') && rest.starts_with('/') {
                format!("{to}{}", &rest[1..])
            } else if rule.from.ends_with('/') && !to.ends_with('/') && !rest.is_empty() {
                format!("{to}/{rest}")
            } else {
                format!("{to}{rest}")
            }
        }
        None => path.to_string(),
    };
    if !rewritten.starts_with('/') {
        rewritten.insert(0, '/');
    }
    if let Some(query) = query {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    rewritten
}

/// The (domain key, target url) pairs a configuration can forward to.
///
/// Targets are keyed the way [`ForwarderCache::get`] keys them; domains
/// without targets map to the local application.
pub fn live_targets(config: &GatewayConfig) -> HashSet<(String, String)> {
    let mut live = HashSet::new();
    for domain in &config.domains {
        if domain.has_targets() {
            for spec in domain.targets() {
                if let Ok(url) = Url::parse(spec.url.trim()) {
                    live.insert((domain.domain.clone(), cache_key_url(&url)));
                }
            }
        } else if let Ok(url) = local_app_url(&domain.domain, &config.app.internal_address) {
            live.insert((domain.domain.clone(), cache_key_url(&url)));
        }
    }
    live
}

fn cache_key_url(base: &Url) -> String {
    base.as_str().trim_end_matches('/').to_string()
}

fn local_app_url(domain_key: &str, address: &str) -> Result<Url, ProxyError> {
    Url::parse(&format!("http://{address}")).map_err(|e| ProxyError::UpstreamConnection {
        domain: domain_key.to_string(),
        target: address.to_string(),
        reason: format!("invalid application address: {e}"),
    })
}

/// Forward one request for a resolved domain.
pub async fn forward(
    state: &AppState,
    snapshot: &GatewaySnapshot,
    resolved: ResolvedDomain,
    scheme: ListenerScheme,
    peer: SocketAddr,
    mut request: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let start = Instant::now();
    let domain = resolved.config.as_ref();
    let key = resolved.key.as_str();
    let method = request.method().clone();
    let original_host = request_host(&request);
    let passthrough = domain.ws && domain.has_targets() && is_upgrade(request.headers());

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let path_and_query = match &domain.rewrite_path {
        Some(rule) => rewrite_path(path_and_query, rule),
        None => path_and_query.to_string(),
    };

    let client = client_ip(request.headers(), peer);
    let (base, pooled) = if domain.has_targets() {
        let Some(upstream) = state
            .upstreams
            .select_upstream(key, domain.load_balance, client)
        else {
            tracing::warn!(domain = %key, client = %client, "No available upstream");
            metrics::record_request(method.as_str(), 502, "none", start);
            return Err(ProxyError::NoUpstream {
                domain: key.to_string(),
            });
        };
        (upstream.base_url.clone(), Some(upstream.url.clone()))
    } else {
        (local_app_url(key, &snapshot.config.app.internal_address)?, None)
    };

    let forwarder = state.forwarders.get(key, &base);
    let target = base.as_str().trim_end_matches('/').to_string();
    let uri = forwarder
        .uri_for(&path_and_query)
        .map_err(|e| ProxyError::BadRequest {
            domain: key.to_string(),
            reason: format!("invalid upstream uri: {e}"),
        })?;

    let client_upgrade: Option<OnUpgrade> =
        passthrough.then(|| hyper::upgrade::on(&mut request));

    let (mut parts, body) = request.into_parts();
    parts.uri = uri;
    parts.version = Version::HTTP_11;
    if !passthrough {
        strip_hop_by_hop(&mut parts.headers);
    }
    if domain.preserve_host_header {
        if !parts.headers.contains_key(header::HOST) {
            if let Some(value) = original_host.as_deref().and_then(|h| HeaderValue::from_str(h).ok()) {
                parts.headers.insert(header::HOST, value);
            }
        }
    } else if let Ok(value) = HeaderValue::from_str(&forwarder.authority()) {
        parts.headers.insert(header::HOST, value);
    }
    set_forwarded(
        &mut parts.headers,
        peer.ip(),
        client,
        original_host.as_deref(),
        scheme.as_str(),
    );
    apply_custom(&mut parts.headers, &domain.headers.request);
    let outbound = Request::from_parts(parts, body);

    let health: Arc<dyn UpstreamHealth> = state.upstreams.clone();
    let guard = pooled
        .as_deref()
        .map(|url| InFlight::acquire(Arc::clone(&health), key, url));

    tracing::debug!(domain = %key, target = %target, uri = %outbound.uri(), "Forwarding request");

    let timeout = upstream_timeout(domain, &snapshot.config.timeouts);
    let deadline = time::Instant::now() + timeout;
    let result = with_timeout(timeout, forwarder.client.request(outbound)).await;

    match result {
        Ok(mut response) => {
            let status = response.status();
            metrics::record_request(method.as_str(), status.as_u16(), &target, start);

            if status == StatusCode::SWITCHING_PROTOCOLS {
                if let Some(client_upgrade) = client_upgrade {
                    if let Some(url) = pooled.as_deref() {
                        passive::record_response(health.as_ref(), key, url, status, start.elapsed());
                    }
                    let upstream_upgrade = hyper::upgrade::on(&mut response);
                    tokio::spawn(tunnel(
                        client_upgrade,
                        upstream_upgrade,
                        guard,
                        key.to_string(),
                        target.clone(),
                    ));
                    let (mut parts, _) = response.into_parts();
                    apply_custom(&mut parts.headers, &domain.headers.response);
                    return Ok(Response::from_parts(parts, Body::empty()));
                }
            }

            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            apply_custom(&mut parts.headers, &domain.headers.response);
            if HttpBody::is_end_stream(&body) {
                if let Some(url) = pooled.as_deref() {
                    passive::record_response(health.as_ref(), key, url, status, start.elapsed());
                }
                return Ok(Response::from_parts(parts, Body::new(body)));
            }
            let watch = BodyWatch {
                guard,
                status,
                started: start,
                timeout,
                domain: key.to_string(),
                target,
            };
            Ok(Response::from_parts(parts, guarded_body(body, deadline, watch)))
        }
        Err(CallError::TimedOut(limit)) => {
            if let Some(url) = pooled.as_deref() {
                passive::record_error(health.as_ref(), key, url);
            }
            tracing::error!(domain = %key, target = %target, timeout_ms = limit.as_millis() as u64, "Upstream request timed out");
            metrics::record_request(method.as_str(), 502, &target, start);
            Err(ProxyError::UpstreamTimeout {
                domain: key.to_string(),
                target,
                timeout: limit,
            })
        }
        Err(CallError::Failed(e)) => {
            if let Some(url) = pooled.as_deref() {
                passive::record_error(health.as_ref(), key, url);
            }
            tracing::error!(domain = %key, target = %target, error = %e, "Upstream connection error");
            metrics::record_request(method.as_str(), 502, &target, start);
            Err(ProxyError::UpstreamConnection {
                domain: key.to_string(),
                target,
                reason: e.to_string(),
            })
        }
    }
}

/// Accounting that settles once the response body ends.
struct BodyWatch {
    guard: Option<InFlight>,
    status: StatusCode,
    started: Instant,
    timeout: Duration,
    domain: String,
    target: String,
}

impl BodyWatch {
    fn completed(self) {
        if let Some(guard) = &self.guard {
            passive::record_response(
                guard.health.as_ref(),
                &guard.domain,
                &guard.target,
                self.status,
                self.started.elapsed(),
            );
        }
    }

    fn failed(self) {
        if let Some(guard) = &self.guard {
            passive::record_error(guard.health.as_ref(), &guard.domain, &guard.target);
        }
    }
}

type BodyState = (BodyDataStream, Pin<Box<Sleep>>, BodyWatch);

/// Response body bounded by the request deadline.
///
/// The in-flight slot is held until the stream ends or is dropped. When the
/// deadline fires mid-body the stream yields an error, which makes hyper
/// abort the client connection, and the upstream is charged a failure.
fn guarded_body(body: Incoming, deadline: time::Instant, watch: BodyWatch) -> Body {
    let state: Option<BodyState> = Some((
        Body::new(body).into_data_stream(),
        Box::pin(time::sleep_until(deadline)),
        watch,
    ));

    let stream = stream::unfold(state, |state| async move {
        let (mut data, mut expiry, watch) = state?;
        let item: Result<Bytes, BoxError> = tokio::select! {
            chunk = data.next() => match chunk {
                Some(Ok(bytes)) => Ok(bytes),
                Some(Err(e)) => {
                    tracing::warn!(domain = %watch.domain, target = %watch.target, error = %e, "Upstream body failed");
                    watch.failed();
                    return Some((Err(BoxError::from(e)), None));
                }
                None => {
                    watch.completed();
                    return None;
                }
            },
            _ = &mut expiry => {
                tracing::error!(
                    domain = %watch.domain,
                    target = %watch.target,
                    timeout_ms = watch.timeout.as_millis() as u64,
                    "Upstream response timed out mid-body"
                );
                watch.failed();
                let e = io::Error::new(io::ErrorKind::TimedOut, "upstream body deadline elapsed");
                return Some((Err(BoxError::from(e)), None));
            }
        };
        Some((item, Some((data, expiry, watch))))
    });
    Body::from_stream(stream)
}

/// Splice the client and upstream connections after a 101.
async fn tunnel(
    client: OnUpgrade,
    upstream: OnUpgrade,
    guard: Option<InFlight>,
    domain: String,
    target: String,
) {
    let (client, upstream) = match tokio::try_join!(client, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(domain = %domain, target = %target, error = %e, "Upgrade passthrough failed");
            return;
        }
    };

    let mut client = TokioIo::new(client);
    let mut upstream = TokioIo::new(upstream);
    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((sent, received)) => {
            tracing::debug!(domain = %domain, target = %target, sent, received, "Upgrade passthrough closed");
        }
        Err(e) => {
            tracing::debug!(domain = %domain, target = %target, error = %e, "Upgrade passthrough ended with error");
        }
    }
    drop(guard);
}

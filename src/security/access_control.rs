//! API key and whitelist enforcement.
//!
//! # Responsibilities
//! - Judge every request once, from its own headers, against an ordered
//!   list of allow rules
//! - Judge (and forward) the canonical path, never the raw one
//! - Require the API key on `/api/` paths and on unexempted upgrades
//! - Reply with JSON 401 (HTTP) or a bare 401 (WebSocket upgrade)
//!
//! # Check Order
//! ```text
//! 1. fixed system route        → allow
//! 2. static asset extension    → allow
//! 3. whitelist (first match)   → allow
//! 4. loopback/private peer     → allow
//! 5. UI cookie + own origin    → allow
//! 6. auth disabled             → allow
//! 7. /api/ path or upgrade     → key required; other paths → allow
//! ```

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use url::Url;

use crate::config::GatewayConfig;
use crate::http::request::{canonicalize_target, is_upgrade};
use crate::http::response::{json_error, reject_upgrade};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::routing::matcher::normalize_host;
use crate::security::api_key::{body_may_carry_key, key_from_body, key_from_parts, KeyCheck};
use crate::security::whitelist::Whitelist;

/// Routes that never require a key.
const SYSTEM_ROUTES: &[&str] = &["/status", "/health", "/robots.txt", "/favicon.ico"];

/// Extensions served by the static layer.
const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "mjs", "map", "html", "htm", "png", "jpg", "jpeg", "gif", "svg", "ico",
    "webp", "avif", "woff", "woff2", "ttf", "otf", "eot", "txt", "webmanifest", "mp3", "mp4",
    "webm", "wav",
];

/// Why a request was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    SystemRoute,
    StaticAsset,
    Whitelisted,
    LocalPeer,
    SameOrigin,
    AuthDisabled,
    NonApiPath,
}

/// Outcome of the header-only checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow(AllowReason),
    KeyRequired,
}

/// Immutable auth policy derived from configuration.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    enabled: bool,
    whitelist: Whitelist,
    health_path: String,
    ui_cookie_name: String,
    public_origin: Option<Url>,
    trust_private_networks: bool,
    max_body_bytes: usize,
}

impl AuthPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let public_origin = config.auth.public_url.as_deref().and_then(|raw| {
            Url::parse(raw)
                .inspect_err(|e| tracing::warn!(public_url = %raw, error = %e, "Ignoring unparsable public_url"))
                .ok()
        });

        Self {
            enabled: config.auth.enabled,
            whitelist: Whitelist::from_patterns(&config.auth.whitelist),
            health_path: config.health_check.path.clone(),
            ui_cookie_name: config.auth.ui_cookie_name.clone(),
            public_origin,
            trust_private_networks: config.auth.trust_private_networks,
            max_body_bytes: config.auth.max_body_bytes,
        }
    }

    /// Run checks 1-7 without looking at a key.
    pub fn evaluate(&self, path: &str, peer: IpAddr, headers: &HeaderMap, upgrade: bool) -> Verdict {
        if SYSTEM_ROUTES.contains(&path) || path == self.health_path {
            return Verdict::Allow(AllowReason::SystemRoute);
        }
        if is_static_asset(path) {
            return Verdict::Allow(AllowReason::StaticAsset);
        }
        if self.whitelist.allows(path) {
            return Verdict::Allow(AllowReason::Whitelisted);
        }
        if self.trust_private_networks && is_local_or_private(peer) {
            return Verdict::Allow(AllowReason::LocalPeer);
        }
        if self.is_same_origin_ui(headers) {
            return Verdict::Allow(AllowReason::SameOrigin);
        }
        if !self.enabled {
            return Verdict::Allow(AllowReason::AuthDisabled);
        }
        if upgrade || is_api_path(path) {
            Verdict::KeyRequired
        } else {
            Verdict::Allow(AllowReason::NonApiPath)
        }
    }

    fn is_same_origin_ui(&self, headers: &HeaderMap) -> bool {
        let Some(public) = &self.public_origin else {
            return false;
        };
        if !has_cookie(headers, &self.ui_cookie_name) {
            return false;
        }

        let header_url = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| Url::parse(v).ok())
        };
        // The most specific header present decides.
        if headers.contains_key(header::ORIGIN) {
            return header_url(header::ORIGIN).is_some_and(|origin| same_origin(public, &origin));
        }
        if headers.contains_key(header::REFERER) {
            return header_url(header::REFERER).is_some_and(|referer| same_origin(public, &referer));
        }
        headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|host| host_matches(public, host))
    }
}

/// `/api` itself or anything below `/api/`.
pub fn is_api_path(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

fn is_static_asset(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path);
    last.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext.as_str()))
}

/// Loopback, RFC 1918, link-local and IPv6 unique-local addresses.
pub fn is_local_or_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_local_or_private(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

fn has_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(k, v)| k == name && !v.is_empty())
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str().map(str::to_ascii_lowercase) == b.host_str().map(str::to_ascii_lowercase)
        && a.port_or_known_default() == b.port_or_known_default()
}

fn host_matches(public: &Url, host_header: &str) -> bool {
    let Some(public_host) = public.host_str() else {
        return false;
    };
    if normalize_host(host_header) != normalize_host(public_host) {
        return false;
    }
    let port = host_header
        .rsplit_once(':')
        .and_then(|(_, p)| p.parse::<u16>().ok());
    match port {
        Some(port) => Some(port) == public.port_or_known_default(),
        None => true,
    }
}

/// Axum middleware enforcing the auth policy.
pub async fn auth_middleware(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match canonicalize_target(&mut request) {
        Ok(true) => tracing::debug!(path = %request.uri().path(), "Request path canonicalized"),
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(remote = %peer, error = %e, "Request path has no canonical form");
            return json_error(StatusCode::BAD_REQUEST, "invalid request path");
        }
    }

    let snapshot = state.inner.load_full();
    let policy = &snapshot.auth;
    let upgrade = is_upgrade(request.headers());
    let path = request.uri().path().to_string();

    match policy.evaluate(&path, peer.ip(), request.headers(), upgrade) {
        Verdict::Allow(reason) => {
            tracing::trace!(path = %path, reason = ?reason, "Auth check passed");
            next.run(request).await
        }
        Verdict::KeyRequired => {
            let (request, provided) = if upgrade {
                let key = key_from_parts(request.headers(), request.uri().query());
                (request, key)
            } else {
                match key_with_body(request, policy.max_body_bytes).await {
                    Ok(found) => found,
                    Err(response) => return response,
                }
            };

            let reason = match provided.as_deref().map(|key| state.api_keys.verify(key)) {
                Some(KeyCheck::Match) => return next.run(request).await,
                Some(KeyCheck::LengthMismatch) | Some(KeyCheck::Mismatch) => "invalid_key",
                None => "missing_key",
            };

            tracing::warn!(remote = %peer, path = %path, reason, upgrade, "Request rejected: API key required");
            metrics::record_auth_rejected(reason);
            if upgrade {
                reject_upgrade(StatusCode::UNAUTHORIZED)
            } else {
                json_error(StatusCode::UNAUTHORIZED, "invalid or missing API key")
            }
        }
    }
}

/// Look for a key in headers and query, then in a JSON or form body.
async fn key_with_body(
    request: Request<Body>,
    limit: usize,
) -> Result<(Request<Body>, Option<String>), Response> {
    if let Some(key) = key_from_parts(request.headers(), request.uri().query()) {
        return Ok((request, Some(key)));
    }
    if !body_may_carry_key(request.headers()) {
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|e| {
        tracing::warn!(error = %e, limit, "Request body unreadable while looking for an API key");
        json_error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
    })?;
    let key = key_from_body(&parts.headers, &bytes);
    Ok((Request::from_parts(parts, Body::from(bytes)), key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn policy(enabled: bool) -> AuthPolicy {
        let mut config = GatewayConfig::default();
        config.auth.enabled = enabled;
        config.auth.whitelist = vec!["/health".into(), "/media/*".into(), "/uploads/".into()];
        config.auth.public_url = Some("https://app.example.com".into());
        AuthPolicy::from_config(&config)
    }

    fn remote() -> IpAddr {
        "203.0.113.5".parse().unwrap()
    }

    #[test]
    fn ordered_allow_rules() {
        let p = policy(true);
        let none = HeaderMap::new();
        assert_eq!(p.evaluate("/status", remote(), &none, false), Verdict::Allow(AllowReason::SystemRoute));
        assert_eq!(p.evaluate("/api/app.js", remote(), &none, false), Verdict::Allow(AllowReason::StaticAsset));
        assert_eq!(p.evaluate("/media/a", remote(), &none, false), Verdict::Allow(AllowReason::Whitelisted));
        assert_eq!(
            p.evaluate("/api/x", "192.168.1.4".parse().unwrap(), &none, false),
            Verdict::Allow(AllowReason::LocalPeer)
        );
        assert_eq!(p.evaluate("/api/x", remote(), &none, false), Verdict::KeyRequired);
        assert_eq!(p.evaluate("/dashboard", remote(), &none, false), Verdict::Allow(AllowReason::NonApiPath));
        assert_eq!(p.evaluate("/mediaX", remote(), &none, false), Verdict::Allow(AllowReason::NonApiPath));
    }

    #[test]
    fn upgrades_require_key_on_any_path() {
        let p = policy(true);
        assert_eq!(p.evaluate("/device", remote(), &HeaderMap::new(), true), Verdict::KeyRequired);
        assert_eq!(
            p.evaluate("/uploads/live", remote(), &HeaderMap::new(), true),
            Verdict::Allow(AllowReason::Whitelisted)
        );
    }

    #[test]
    fn disabled_auth_allows_after_local_checks() {
        let p = policy(false);
        assert_eq!(
            p.evaluate("/api/x", remote(), &HeaderMap::new(), false),
            Verdict::Allow(AllowReason::AuthDisabled)
        );
    }

    #[test]
    fn ui_cookie_needs_own_origin() {
        let p = policy(true);
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; gateway_ui=1"));
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://evil.example.net"));
        assert_eq!(p.evaluate("/api/x", remote(), &headers, false), Verdict::KeyRequired);

        headers.insert(header::ORIGIN, HeaderValue::from_static("https://app.example.com"));
        assert_eq!(p.evaluate("/api/x", remote(), &headers, false), Verdict::Allow(AllowReason::SameOrigin));

        headers.remove(header::ORIGIN);
        headers.insert(header::HOST, HeaderValue::from_static("app.example.com:443"));
        assert_eq!(p.evaluate("/api/x", remote(), &headers, false), Verdict::Allow(AllowReason::SameOrigin));

        // A foreign Origin is not rescued by a matching Host.
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://evil.example.net"));
        assert_eq!(p.evaluate("/api/x", remote(), &headers, false), Verdict::KeyRequired);
        headers.remove(header::ORIGIN);

        headers.remove(header::COOKIE);
        assert_eq!(p.evaluate("/api/x", remote(), &headers, false), Verdict::KeyRequired);
    }

    #[test]
    fn private_ranges() {
        for ip in ["127.0.0.1", "10.2.3.4", "172.16.0.1", "192.168.0.9", "169.254.1.1", "::1", "fd00::1", "fe80::1", "::ffff:10.0.0.1"] {
            assert!(is_local_or_private(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["8.8.8.8", "172.32.0.1", "2001:db8::1"] {
            assert!(!is_local_or_private(ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn private_trust_can_be_disabled() {
        let mut config = GatewayConfig::default();
        config.auth.enabled = true;
        config.auth.trust_private_networks = false;
        let p = AuthPolicy::from_config(&config);
        assert_eq!(
            p.evaluate("/api/x", "127.0.0.1".parse().unwrap(), &HeaderMap::new(), false),
            Verdict::KeyRequired
        );
    }

    #[test]
    fn api_paths() {
        assert!(is_api_path("/api/users"));
        assert!(is_api_path("/api"));
        assert!(!is_api_path("/apis"));
    }
}

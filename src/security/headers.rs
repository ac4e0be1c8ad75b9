//! Header manipulation for forwarded traffic.
//!
//! # Responsibilities
//! - Derive the real client IP (CDN header, X-Forwarded-For, X-Real-IP, socket)
//! - Add X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host, X-Real-IP
//! - Strip hop-by-hop headers
//! - Apply per-domain custom headers
//!
//! # Design Decisions
//! - Preserve the original client chain in X-Forwarded-For (append)
//! - Hop-by-hop headers are kept only on an upgrade passthrough
//! - Invalid custom header names/values are skipped with a warning

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

/// Headers set by CDNs with the original client address, by priority.
pub const CDN_CLIENT_IP_HEADERS: &[&str] = &["cf-connecting-ip", "true-client-ip", "fastly-client-ip"];

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_REAL_IP: &str = "x-real-ip";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Client IP with priority CDN header > first X-Forwarded-For entry >
/// X-Real-IP > socket address.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    CDN_CLIENT_IP_HEADERS
        .iter()
        .find_map(|name| header_ip(headers, name))
        .or_else(|| {
            headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|first| first.trim().parse().ok())
        })
        .or_else(|| header_ip(headers, X_REAL_IP))
        .unwrap_or_else(|| peer.ip())
}

/// Remove hop-by-hop headers, including those named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Add the X-Forwarded-* family and X-Real-IP.
///
/// `peer` is the socket address appended to the chain; `client` is the
/// derived original client.
pub fn set_forwarded(
    headers: &mut HeaderMap,
    peer: IpAddr,
    client: IpAddr,
    host: Option<&str>,
    proto: &str,
) {
    let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {peer}"),
        _ => peer.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(&client.to_string()) {
        headers.insert(X_REAL_IP, value);
    }
    if let Some(value) = host.and_then(|h| HeaderValue::from_str(h).ok()) {
        headers.insert(X_FORWARDED_HOST, value);
    }
    let proto = if proto == "https" { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
}

/// Insert (replacing) every configured custom header.
pub fn apply_custom(headers: &mut HeaderMap, custom: &BTreeMap<String, String>) {
    for (name, value) in custom {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid custom header"),
        }
    }
}

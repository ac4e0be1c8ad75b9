//! Request inspection helpers.
//!
//! # Responsibilities
//! - Generate unique request IDs (UUID v4)
//! - Extract routing-relevant information (host, upgrade intent)
//! - Tag requests with the scheme of the listener that accepted them
//! - Canonicalize request paths before any access decision
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing and propagated upstream
//! - Host taken from the Host header, falling back to the URI authority (HTTP/2)
//! - The canonical path replaces the original one, so the path that was
//!   authorized is the path that gets forwarded

use std::borrow::Cow;

use axum::http::{header, uri::PathAndQuery, HeaderMap, HeaderValue, Request, Uri};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// Request correlation header.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates a UUID v4 request ID when the client sent none.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Scheme of the listener a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerScheme {
    Http,
    Https,
}

impl ListenerScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            ListenerScheme::Http => "http",
            ListenerScheme::Https => "https",
        }
    }

    pub fn ws_str(self) -> &'static str {
        match self {
            ListenerScheme::Http => "ws",
            ListenerScheme::Https => "wss",
        }
    }
}

/// Raw host (possibly with port) the request was addressed to.
pub fn request_host<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.as_str().to_string()))
        .filter(|h| !h.trim().is_empty())
}

/// Whether the request asks for a WebSocket upgrade.
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    connection_upgrade && websocket
}

/// The request ID assigned by the request-id layer, if any.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Canonical form of a request path.
///
/// Percent-encoded unreserved characters are decoded, repeated slashes are
/// merged and `.`/`..` segments are resolved without climbing above the
/// root. A trailing slash is kept. Paths not starting with `/` are returned
/// unchanged.
pub fn canonical_path(path: &str) -> String {
    if !path.starts_with('/') {
        return path.to_string();
    }
    let decoded = decode_unreserved(path);

    let mut segments: Vec<&str> = Vec::new();
    let mut trailing_slash = false;
    for segment in decoded.split('/').skip(1) {
        match segment {
            "" | "." => trailing_slash = true,
            ".." => {
                segments.pop();
                trailing_slash = true;
            }
            name => {
                segments.push(name);
                trailing_slash = false;
            }
        }
    }

    let mut canonical = String::with_capacity(decoded.len());
    for segment in &segments {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() || trailing_slash {
        canonical.push('/');
    }
    canonical
}

fn decode_unreserved(path: &str) -> Cow<'_, str> {
    if !path.contains('%') {
        return Cow::Borrowed(path);
    }
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let decoded = path
                .get(i + 1..i + 3)
                .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'));
            if let Some(byte) = decoded {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).map_or(Cow::Borrowed(path), Cow::Owned)
}

/// Replace the request path with its canonical form, keeping the query.
///
/// Returns whether the target changed.
pub fn canonicalize_target<B>(request: &mut Request<B>) -> Result<bool, axum::http::Error> {
    let canonical = canonical_path(request.uri().path());
    if canonical == request.uri().path() {
        return Ok(false);
    }
    let target = match request.uri().query() {
        Some(query) => format!("{canonical}?{query}"),
        None => canonical,
    };

    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(target)?);
    *request.uri_mut() = Uri::from_parts(parts)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn canonical_paths() {
        assert_eq!(canonical_path("/api/users"), "/api/users");
        assert_eq!(canonical_path("//api/secret"), "/api/secret");
        assert_eq!(canonical_path("/api//secret"), "/api/secret");
        assert_eq!(canonical_path("/%61pi/secret"), "/api/secret");
        assert_eq!(canonical_path("/%41PI/x"), "/API/x");
        assert_eq!(canonical_path("/media/../api/secret"), "/api/secret");
        assert_eq!(canonical_path("/media/%2e%2E/api/secret"), "/api/secret");
        assert_eq!(canonical_path("/./a/./b/"), "/a/b/");
        assert_eq!(canonical_path("/../../etc"), "/etc");
        assert_eq!(canonical_path("/"), "/");
        assert_eq!(canonical_path("/a/.."), "/");
        assert_eq!(canonical_path("*"), "*");
    }

    #[test]
    fn reserved_escapes_stay_encoded() {
        assert_eq!(canonical_path("/files/a%2Fb"), "/files/a%2Fb");
        assert_eq!(canonical_path("/q/%20x%"), "/q/%20x%");
        assert_eq!(canonical_path("/q/%zz"), "/q/%zz");
    }

    #[test]
    fn target_rewrite_keeps_query() {
        let mut req = Request::builder()
            .uri("//api/./orders?id=7")
            .body(Body::empty())
            .unwrap();
        assert!(canonicalize_target(&mut req).unwrap());
        assert_eq!(req.uri().path_and_query().unwrap().as_str(), "/api/orders?id=7");

        let mut req = Request::builder().uri("/plain?x=1").body(Body::empty()).unwrap();
        assert!(!canonicalize_target(&mut req).unwrap());
    }

    #[test]
    fn host_from_header_or_authority() {
        let req = Request::builder()
            .uri("/x")
            .header(header::HOST, "a.example.com:8080")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&req).as_deref(), Some("a.example.com:8080"));

        let req = Request::builder()
            .uri("https://b.example.com/x")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_host(&req).as_deref(), Some("b.example.com"));
    }

    #[test]
    fn upgrade_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(!is_upgrade(&headers));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_upgrade(&headers));
    }

    #[test]
    fn generated_ids_are_uuids() {
        let req = Request::builder().body(Body::empty()).unwrap();
        let id = MakeRequestUuid.make_request_id(&req).unwrap();
        let id = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}

//! Response construction for gateway-generated replies.
//!
//! # Responsibilities
//! - Map proxy failures to JSON error bodies with the right status
//! - Build bare status replies for rejected WebSocket upgrades
//!
//! # Design Decisions
//! - Errors never leak internals (no stack traces, no upstream bodies)
//! - Upstream timeouts and connection errors are both 502
//! - Upgrade rejections carry no body and close the connection

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<&'a str>,
}

/// Failures while routing or forwarding a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("domain not configured: {domain}")]
    DomainNotConfigured { domain: String },

    #[error("no available upstream for {domain}")]
    NoUpstream { domain: String },

    #[error("upstream {target} timed out after {timeout:?}")]
    UpstreamTimeout {
        domain: String,
        target: String,
        timeout: Duration,
    },

    #[error("upstream {target} connection error: {reason}")]
    UpstreamConnection {
        domain: String,
        target: String,
        reason: String,
    },

    #[error("invalid upstream request for {domain}: {reason}")]
    BadRequest { domain: String, reason: String },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::DomainNotConfigured { .. } => StatusCode::NOT_FOUND,
            ProxyError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ProxyError::NoUpstream { .. }
            | ProxyError::UpstreamTimeout { .. }
            | ProxyError::UpstreamConnection { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    fn message(&self) -> String {
        match self {
            ProxyError::DomainNotConfigured { .. } => "domain not configured".to_string(),
            ProxyError::NoUpstream { .. } => "no available upstream".to_string(),
            ProxyError::UpstreamTimeout { timeout, .. } => {
                format!("upstream timed out after {}ms", timeout.as_millis())
            }
            ProxyError::UpstreamConnection { .. } => "upstream connection error".to_string(),
            ProxyError::BadRequest { reason, .. } => reason.clone(),
        }
    }

    fn domain(&self) -> &str {
        match self {
            ProxyError::DomainNotConfigured { domain }
            | ProxyError::NoUpstream { domain }
            | ProxyError::UpstreamTimeout { domain, .. }
            | ProxyError::UpstreamConnection { domain, .. }
            | ProxyError::BadRequest { domain, .. } => domain,
        }
    }

    fn target(&self) -> Option<&str> {
        match self {
            ProxyError::UpstreamTimeout { target, .. }
            | ProxyError::UpstreamConnection { target, .. } => Some(target),
            _ => None,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: status.canonical_reason().unwrap_or("Error"),
            message: self.message(),
            domain: Some(self.domain()),
            target: self.target(),
        };
        (status, Json(body)).into_response()
    }
}

/// JSON error without domain context (auth failures, admin errors).
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: status.canonical_reason().unwrap_or("Error"),
        message: message.into(),
        domain: None,
        target: None,
    };
    (status, Json(body)).into_response()
}

/// Bare status line for a rejected upgrade; the connection is closed after it.
pub fn reject_upgrade(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn no_upstream_is_502_json() {
        let response = ProxyError::NoUpstream {
            domain: "api.example.com".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["message"], "no available upstream");
        assert_eq!(body["domain"], "api.example.com");
        assert!(body.get("target").is_none());
    }

    #[tokio::test]
    async fn connection_error_names_target() {
        let response = ProxyError::UpstreamConnection {
            domain: "d".into(),
            target: "http://10.0.0.1:80".into(),
            reason: "connection refused".into(),
        }
        .into_response();
        let body = body_json(response).await;
        assert_eq!(body["target"], "http://10.0.0.1:80");
        assert_eq!(body["error"], "Bad Gateway");
        assert_eq!(body["message"], "upstream connection error");
    }

    #[test]
    fn rejected_upgrade_has_no_body() {
        let response = reject_upgrade(StatusCode::NOT_FOUND);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }
}

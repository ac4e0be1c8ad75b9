//! API key storage, extraction and comparison.
//!
//! # Responsibilities
//! - Hold the current server key (rotatable at runtime)
//! - Extract a client key from headers, query string or body
//! - Compare keys without leaking timing information
//!
//! # Design Decisions
//! - Lengths are compared before any byte; unequal lengths reject at once
//! - Equal-length keys are compared in constant time
//! - The key is swapped atomically; in-flight checks keep the old one

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::{header, HeaderMap};
use uuid::Uuid;

/// Header carrying the API key.
pub const X_API_KEY: &str = "x-api-key";

/// Query/body field carrying the API key.
pub const API_KEY_FIELD: &str = "api_key";

/// Result of comparing a presented key with the server key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheck {
    Match,
    LengthMismatch,
    Mismatch,
}

/// Compare a presented key with the expected one.
pub fn compare_keys(provided: &[u8], expected: &[u8]) -> KeyCheck {
    if provided.len() != expected.len() {
        return KeyCheck::LengthMismatch;
    }
    let diff = provided
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if diff == 0 {
        KeyCheck::Match
    } else {
        KeyCheck::Mismatch
    }
}

/// The server's API key.
#[derive(Debug)]
pub struct ApiKeyStore {
    current: ArcSwap<String>,
    /// Key as last seen in configuration; a reload only replaces the current
    /// key when this changes, so a rotated key survives unrelated reloads.
    configured: ArcSwap<String>,
}

impl ApiKeyStore {
    pub fn new(configured: &str) -> Self {
        let store = Self {
            current: ArcSwap::from_pointee(String::new()),
            configured: ArcSwap::from_pointee(String::new()),
        };
        store.install_configured(configured);
        store
    }

    fn install_configured(&self, configured: &str) {
        self.configured.store(Arc::new(configured.to_string()));
        if configured.is_empty() {
            tracing::warn!("No API key configured, generated a random one (rotate it via the admin API)");
            self.current.store(Arc::new(generate_key()));
        } else {
            self.current.store(Arc::new(configured.to_string()));
        }
    }

    /// Apply the key from a reloaded configuration.
    pub fn reconfigure(&self, configured: &str) {
        if self.configured.load().as_str() != configured {
            tracing::info!("API key changed in configuration");
            self.install_configured(configured);
        }
    }

    /// Generate, install and return a new key.
    pub fn rotate(&self) -> String {
        let key = generate_key();
        self.current.store(Arc::new(key.clone()));
        tracing::info!("API key rotated");
        key
    }

    pub fn verify(&self, provided: &str) -> KeyCheck {
        compare_keys(provided.as_bytes(), self.current.load().as_bytes())
    }
}

fn generate_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Key from `X-API-Key`, `Authorization: Bearer` or the `api_key` query
/// parameter, in that order.
pub fn key_from_parts(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(key) = headers
        .get(X_API_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(key.to_string());
    }

    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(token.to_string());
    }

    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(name, _)| name == API_KEY_FIELD)
            .map(|(_, value)| value.into_owned())
            .filter(|v| !v.is_empty())
    })
}

/// Whether a body of this content type may carry an `api_key` field.
pub fn body_may_carry_key(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.starts_with("application/json")
                || ct.starts_with("application/x-www-form-urlencoded")
        })
}

/// `api_key` field of a JSON object or urlencoded form body.
pub fn key_from_body(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/json") {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value
            .get(API_KEY_FIELD)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(body)
            .find(|(name, _)| name == API_KEY_FIELD)
            .map(|(_, value)| value.into_owned())
            .filter(|v| !v.is_empty())
    } else {
        None
    }
}

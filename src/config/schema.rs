//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::load_balancer::LoadBalancePolicy;

/// Root configuration for the edge gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Public listener configuration (HTTP and optional HTTPS).
    pub listener: ListenerConfig,

    /// The locally bound application server fronted by the gateway.
    pub app: AppConfig,

    /// Virtual hosts, in registration order.
    pub domains: Vec<DomainConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// API key and whitelist policy.
    pub auth: AuthConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Look up a domain entry by its exact configured name.
    pub fn domain(&self, name: &str) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.domain.eq_ignore_ascii_case(name))
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Plain HTTP bind address (e.g., "0.0.0.0:80").
    pub http_address: String,

    /// HTTPS bind address. TLS is only served when this is set and at least
    /// one certificate loaded.
    pub https_address: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            http_address: "0.0.0.0:8080".to_string(),
            https_address: None,
        }
    }
}

/// The application server behind the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Internal address of the application (e.g., "127.0.0.1:3000").
    pub internal_address: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            internal_address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// A virtual host served by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DomainConfig {
    /// Hostname, or `*.base` wildcard.
    pub domain: String,

    /// Upstream target(s). Absent means "forward to the local application".
    #[serde(default)]
    pub target: Option<TargetConfig>,

    /// Load balancing policy for multi-target domains.
    #[serde(default)]
    pub load_balance: LoadBalancePolicy,

    /// Health probe URL or path. Defaults to `<target><health_check.path>`.
    #[serde(default)]
    pub health_url: Option<String>,

    /// TLS certificate settings.
    #[serde(default)]
    pub ssl: Option<SslConfig>,

    /// Path prefix rewrite applied before forwarding.
    #[serde(default)]
    pub rewrite_path: Option<RewritePath>,

    /// Forward the client's Host header instead of the target's authority.
    #[serde(default)]
    pub preserve_host_header: bool,

    /// Pass WebSocket upgrades through to the upstream.
    #[serde(default)]
    pub ws: bool,

    /// Upstream timeout in milliseconds (falls back to `timeouts.upstream_ms`).
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Custom headers added to forwarded requests and responses.
    #[serde(default)]
    pub headers: HeaderRules,

    /// Subdomain captured when this entry was resolved through a wildcard.
    #[serde(skip)]
    pub subdomain: Option<String>,
}

impl DomainConfig {
    /// Whether this entry declares explicit upstream targets.
    pub fn has_targets(&self) -> bool {
        self.target.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Expanded target list (empty when forwarding to the local app).
    pub fn targets(&self) -> Vec<TargetSpec> {
        self.target.as_ref().map(TargetConfig::specs).unwrap_or_default()
    }

    /// Certificate paths, when TLS is enabled and a certificate is present.
    pub fn certificate(&self) -> Option<&CertificateConfig> {
        self.ssl
            .as_ref()
            .filter(|ssl| ssl.enabled)
            .and_then(|ssl| ssl.certificate.as_ref())
    }
}

/// Single URL or list of upstream descriptors.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TargetConfig {
    Single(String),
    Multiple(Vec<TargetEntry>),
}

impl TargetConfig {
    pub fn is_empty(&self) -> bool {
        match self {
            TargetConfig::Single(url) => url.trim().is_empty(),
            TargetConfig::Multiple(list) => list.is_empty(),
        }
    }

    /// Normalize into a list of weighted targets.
    pub fn specs(&self) -> Vec<TargetSpec> {
        match self {
            TargetConfig::Single(url) => vec![TargetSpec {
                url: url.clone(),
                weight: default_weight(),
            }],
            TargetConfig::Multiple(list) => list
                .iter()
                .map(|entry| match entry {
                    TargetEntry::Url(url) => TargetSpec {
                        url: url.clone(),
                        weight: default_weight(),
                    },
                    TargetEntry::Detailed(spec) => spec.clone(),
                })
                .collect(),
        }
    }
}

/// An entry in a target list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TargetEntry {
    Url(String),
    Detailed(TargetSpec),
}

/// Upstream descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetSpec {
    /// Upstream base URL (e.g., "http://10.0.0.5:8080").
    pub url: String,

    /// Weight for the weighted policy (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// TLS settings for a domain.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SslConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub certificate: Option<CertificateConfig>,
}

/// PEM file locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificateConfig {
    /// Private key (PEM).
    pub key: String,
    /// Certificate chain (PEM).
    pub cert: String,
    /// Optional CA / intermediate bundle appended to the chain.
    #[serde(default)]
    pub ca: Option<String>,
}

/// Prefix rewrite rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewritePath {
    pub from: String,
    pub to: String,
}

/// Custom headers added in each direction.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HeaderRules {
    pub request: BTreeMap<String, String>,
    pub response: BTreeMap<String, String>,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path appended to a target when no `health_url` is configured; also the
    /// gateway's own health endpoint.
    pub path: String,

    /// Consecutive failures before a target is excluded.
    pub max_failures: u32,

    /// Minimum seconds between refreshes of a cached health status.
    pub cache_time_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_ms: 5000,
            path: "/health".to_string(),
            max_failures: 3,
            cache_time_secs: 5,
        }
    }
}

/// API key and whitelist settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable API key enforcement.
    pub enabled: bool,

    /// Server API key. A random key is generated when empty.
    pub api_key: String,

    /// Path patterns exempt from the API key, evaluated in order.
    pub whitelist: Vec<String>,

    /// Cookie set by the bundled UI.
    pub ui_cookie_name: String,

    /// Externally visible URL of this server (e.g., "https://app.example.com").
    pub public_url: Option<String>,

    /// Maximum request body buffered when looking for an `api_key` field.
    pub max_body_bytes: usize,

    /// Let loopback, private and link-local peers through without a key.
    /// Disable when another proxy on the same host fronts the gateway.
    pub trust_private_networks: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            whitelist: Vec::new(),
            ui_cookie_name: "gateway_ui".to_string(),
            public_url: None,
            max_body_bytes: 1024 * 1024,
            trust_private_networks: true,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time for a request handled by the gateway, in seconds.
    pub request_secs: u64,

    /// Default upstream timeout in milliseconds.
    pub upstream_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            upstream_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_and_multiple_targets() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[domains]]
            domain = "api.example.com"
            target = "http://127.0.0.1:9000"

            [[domains]]
            domain = "*.apps.example.com"
            load_balance = "least-connections"
            target = ["http://10.0.0.1:80", { url = "http://10.0.0.2:80", weight = 3 }]
            rewrite_path = { from = "/", to = "/{subdomain}/" }
            "#,
        )
        .unwrap();

        assert_eq!(config.domains.len(), 2);
        assert_eq!(config.domains[0].targets().len(), 1);
        let targets = config.domains[1].targets();
        assert_eq!(targets[0].weight, 1);
        assert_eq!(targets[1].weight, 3);
        assert_eq!(
            config.domains[1].load_balance,
            LoadBalancePolicy::LeastConnections
        );
        assert!(config.domain("API.example.com").is_some());
    }

    #[test]
    fn domain_without_target_forwards_locally() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[domains]]
            domain = "local.example.com"
            "#,
        )
        .unwrap();
        assert!(!config.domains[0].has_targets());
    }

    #[test]
    fn certificate_requires_enabled_flag() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[domains]]
            domain = "a.example.com"
            ssl = { enabled = false, certificate = { key = "k.pem", cert = "c.pem" } }
            "#,
        )
        .unwrap();
        assert!(config.domains[0].certificate().is_none());
    }
}

//! TLS configuration, certificate loading and SNI resolution.
//!
//! # Responsibilities
//! - Load per-domain certificate chains and keys at startup
//! - Serve the synchronous SNI lookup during handshakes
//! - Swap the whole certificate table atomically on reload
//!
//! # Design Decisions
//! - A domain with missing or unreadable files is logged and served
//!   HTTP-only; startup never aborts because of one certificate
//! - The resolver does no I/O: it reads an immutable snapshot
//! - Wildcard names are registered verbatim (`*.example.com`) and matched
//!   after exact names, first registered wins

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use thiserror::Error;

use crate::config::{CertificateConfig, DomainConfig};
use crate::routing::matcher::{matches_wildcard, normalize_host, wildcard_base};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{kind} file not found: {path}")]
    NotFound { kind: &'static str, path: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0}")]
    EmptyChain(String),
    #[error("no private key found in {0}")]
    MissingKey(String),
    #[error("unsupported private key: {0}")]
    UnsupportedKey(rustls::Error),
    #[error("tls configuration error: {0}")]
    Config(#[from] rustls::Error),
}

/// Name → value table with exact-then-wildcard lookup.
#[derive(Debug, Clone)]
pub struct SniTable<T> {
    entries: Vec<(String, T)>,
    exact: HashMap<String, usize>,
}

impl<T> Default for SniTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            exact: HashMap::new(),
        }
    }
}

impl<T> SniTable<T> {
    /// Register a value under a domain string. Later duplicates are ignored.
    pub fn insert(&mut self, name: &str, value: T) {
        let name = name.trim().to_ascii_lowercase();
        if self.exact.contains_key(&name) {
            return;
        }
        self.exact.insert(name.clone(), self.entries.len());
        self.entries.push((name, value));
    }

    /// Exact match first, then the first registered wildcard covering the name.
    pub fn lookup(&self, server_name: &str) -> Option<&T> {
        let name = normalize_host(server_name);
        if let Some(&index) = self.exact.get(&name) {
            return Some(&self.entries[index].1);
        }
        self.entries.iter().find_map(|(pattern, value)| {
            wildcard_base(pattern)
                .filter(|base| matches_wildcard(&name, base))
                .map(|_| value)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

/// Certificates available for handshakes, by domain string.
pub type CertStore = SniTable<Arc<CertifiedKey>>;

/// Load a certificate chain (plus optional CA bundle) and private key.
pub fn load_certified_key(paths: &CertificateConfig) -> Result<CertifiedKey, TlsError> {
    let mut chain = read_certs(&paths.cert, "certificate")?;
    if chain.is_empty() {
        return Err(TlsError::EmptyChain(paths.cert.clone()));
    }
    if let Some(ca) = &paths.ca {
        chain.extend(read_certs(ca, "CA bundle")?);
    }

    let key = read_key(&paths.key)?;
    let signing_key =
        rustls::crypto::ring::sign::any_supported_type(&key).map_err(TlsError::UnsupportedKey)?;

    Ok(CertifiedKey::new(chain, signing_key))
}

fn open(path: &str, kind: &'static str) -> Result<BufReader<File>, TlsError> {
    if !Path::new(path).exists() {
        return Err(TlsError::NotFound {
            kind,
            path: path.to_string(),
        });
    }
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_string(),
            source,
        })
}

fn read_certs(path: &str, kind: &'static str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path, kind)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_string(),
            source,
        })
}

fn read_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path, "private key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| TlsError::MissingKey(path.to_string()))
}

/// Build the certificate table for every TLS-enabled domain.
///
/// Failures are logged and the domain is left HTTP-only.
pub fn load_certificates(domains: &[DomainConfig]) -> CertStore {
    let mut store = CertStore::default();

    for domain in domains {
        let Some(paths) = domain.certificate() else {
            continue;
        };
        match load_certified_key(paths) {
            Ok(key) => {
                tracing::info!(domain = %domain.domain, "Loaded TLS certificate");
                store.insert(&domain.domain, Arc::new(key));
            }
            Err(e) => {
                tracing::error!(
                    domain = %domain.domain,
                    error = %e,
                    "Certificate unavailable, serving domain over HTTP only"
                );
            }
        }
    }

    store
}

/// rustls certificate resolver backed by an atomically swapped table.
pub struct SniResolver {
    store: ArcSwap<CertStore>,
}

impl SniResolver {
    pub fn new(store: CertStore) -> Self {
        Self {
            store: ArcSwap::from_pointee(store),
        }
    }

    /// Replace the certificate table. Concurrent handshakes see either the
    /// old or the new table, never a mix.
    pub fn reload(&self, store: CertStore) {
        tracing::info!(certificates = store.len(), "Certificate table reloaded");
        self.store.store(Arc::new(store));
    }

    /// Look up the certificate for a server name.
    pub fn resolve_name(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        self.store.load().lookup(server_name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.store.load().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.store.load().names().map(str::to_string).collect()
    }
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniResolver")
            .field("certificates", &self.store.load().len())
            .finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name()?;
        let key = self.resolve_name(server_name);
        if key.is_none() {
            tracing::debug!(server_name, "No certificate for SNI name");
        }
        key
    }
}

/// Build the rustls server configuration around the resolver.
pub fn server_config(resolver: Arc<SniResolver>) -> Result<rustls::ServerConfig, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Listener TLS configuration for axum-server.
pub fn load_tls_config(resolver: Arc<SniResolver>) -> Result<RustlsConfig, TlsError> {
    Ok(RustlsConfig::from_config(Arc::new(server_config(resolver)?)))
}

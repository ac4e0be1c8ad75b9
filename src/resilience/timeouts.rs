//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap upstream calls with a deadline
//! - Resolve the effective upstream timeout of a domain
//! - Cancel operations cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the wrapped future is dropped when the
//!   deadline fires
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time;

use crate::config::{DomainConfig, TimeoutConfig};

/// Outcome of a deadline-bounded call.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{0}")]
    Failed(E),
}

impl<E> CallError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::TimedOut(_))
    }
}

/// Run `fut`, aborting it once `limit` elapses.
pub async fn with_timeout<F, T, E>(limit: Duration, fut: F) -> Result<T, CallError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CallError::Failed(e)),
        Err(_) => Err(CallError::TimedOut(limit)),
    }
}

/// Per-domain override, else the global upstream timeout.
pub fn upstream_timeout(domain: &DomainConfig, defaults: &TimeoutConfig) -> Duration {
    let ms = domain
        .timeout
        .filter(|ms| *ms > 0)
        .unwrap_or(defaults.upstream_ms);
    Duration::from_millis(ms.max(1))
}

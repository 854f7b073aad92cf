//! Error Taxonomy
//!
//! Typed errors for the resilience layer. Each variant carries the
//! diagnostics of the path that was attempted; the both-paths variant
//! carries both, so a caller never needs to know fallback occurred to
//! understand a failure.
//!
//! # Propagation Policy
//!
//! - Transport and backend-unavailable failures on a backend attempt are
//!   recovered locally via the one-shot fallback when it is enabled.
//! - Failures on the direct attempt, or backend failures with fallback
//!   disabled, surface to the caller as-is.
//! - Queue persistence failures surface immediately: an operation that
//!   was not durably stored must never be acknowledged.
//! - Configuration errors are raised at construction, not per request.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the resilience layer
#[derive(Debug, Error)]
pub enum ClientError {
    /// DNS, connection, or timeout failure before any status was received
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Backend was reachable but answered outside the 2xx range
    #[error("backend unavailable at {url} (status {status}): {detail}")]
    BackendUnavailable {
        /// URL that was attempted
        url: String,
        /// HTTP status the backend returned
        status: u16,
        /// Error detail extracted from the response body
        detail: String,
    },

    /// Direct provider answered outside the 2xx range
    #[error("direct provider for '{service}' returned {status}: {detail}")]
    DirectProvider {
        /// Logical service whose provider was called
        service: String,
        /// HTTP status the provider returned
        status: u16,
        /// Error detail extracted from the response body
        detail: String,
    },

    /// Missing or invalid configuration (credential, URL, bounds)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Durable storage rejected a queue write
    #[error("queue persistence failed: {0}")]
    QueuePersistence(String),

    /// Backend attempt and its direct fallback both failed
    #[error("both paths failed for {service}/{path}: backend: {backend}; direct: {direct}")]
    BothPathsFailed {
        /// Logical service name
        service: String,
        /// Endpoint path that was requested
        path: String,
        /// Failure from the backend attempt
        backend: Box<ClientError>,
        /// Failure from the direct fallback attempt
        direct: Box<ClientError>,
    },
}

impl ClientError {
    /// Whether a backend-path failure with this error should trigger the
    /// one-shot direct fallback
    ///
    /// Only transport failures and backend-unavailable responses qualify;
    /// configuration and persistence errors are not routing problems.
    #[must_use]
    pub fn fallback_eligible(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::BackendUnavailable { .. })
    }
}

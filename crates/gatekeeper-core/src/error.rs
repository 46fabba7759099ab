//! Core error types

use gatekeeper_proxy::ProxyError;
use thiserror::Error;

/// Why a request could not be resolved to an upstream target.
///
/// All of these are terminal for the request; the engine never retries.
#[derive(Error, Debug)]
pub enum RouteError {
    /// No package name could be derived from the request path.
    #[error("document not found")]
    UnknownPackage,

    /// Whitelist denial or a write-authorization predicate said no.
    #[error("{0}")]
    Denied(String),

    /// The private-package quota is exhausted.
    #[error("private package limit of {limit} reached")]
    QuotaExceeded { limit: usize },

    /// The existence probe failed at the transport level.
    #[error("existence probe failed: {0}")]
    Probe(#[from] ProxyError),
}

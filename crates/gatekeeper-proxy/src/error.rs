//! Proxy error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid registry target: {0}")]
    InvalidTarget(String),

    #[error("Upstream returned error: {status} - {message}")]
    UpstreamError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Content type mismatch between upstreams: {private} vs {public}")]
    ContentTypeMismatch { private: String, public: String },

    #[error("No merge combiner for content type: {0}")]
    UnsupportedContentType(String),
}

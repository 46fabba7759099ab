//! API error types
//!
//! Converts routing and upstream failures into the minimal JSON envelope
//! clients see: `{"error": "...", "reason": "..."}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use gatekeeper_core::RouteError;
use gatekeeper_proxy::ProxyError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("Forwarding failed: {0}")]
    Forward(ProxyError),

    #[error("Merge failed: {0}")]
    Merge(ProxyError),
}

impl ApiError {
    /// The HTTP status the error response will carry; also reported in the
    /// end-of-request lifecycle event.
    pub fn status(&self) -> StatusCode {
        match self {
            // Nothing matched and nothing was denied outright: plain 404.
            ApiError::Route(RouteError::UnknownPackage) => StatusCode::NOT_FOUND,
            // Denials, exhausted quotas and probe failures are terminal
            // and never retried.
            ApiError::Route(_) => StatusCode::BAD_REQUEST,
            ApiError::Forward(_) | ApiError::Merge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, reason) = match &self {
            ApiError::Route(RouteError::UnknownPackage) => {
                ("not_found", "document not found".to_string())
            }
            ApiError::Route(e) => ("not_found", e.to_string()),
            ApiError::Forward(e) | ApiError::Merge(e) => ("proxy_error", e.to_string()),
        };

        let body = axum::Json(json!({
            "error": code,
            "reason": reason,
        }));

        (status, body).into_response()
    }
}

//! Forwarder and credential-service seams
//!
//! Byte streaming to the resolved upstream and the user-creation flow are
//! external collaborators as far as the decision engine is concerned; they
//! live behind traits so the handlers can be tested without a network.

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use futures::TryStreamExt;
use http::header::{HeaderMap, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::Method;
use std::sync::Arc;
use tracing::info;

use gatekeeper_proxy::{ProxyError, RegistryClient, RegistryTarget};

/// The client request, reduced to the pieces an upstream call needs.
///
/// The body is carried as a stream; publish tarballs are piped to the
/// upstream without ever being buffered whole.
#[derive(Debug)]
pub struct ForwardRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Body,
}

/// Streams a client request to the resolved target and the response back
/// verbatim.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        request: ForwardRequest,
        target: &RegistryTarget,
    ) -> Result<Response, ProxyError>;
}

#[async_trait]
impl Forwarder for RegistryClient {
    async fn forward(
        &self,
        request: ForwardRequest,
        target: &RegistryTarget,
    ) -> Result<Response, ProxyError> {
        let body = if has_request_body(&request.headers) {
            Some(reqwest::Body::wrap_stream(request.body.into_data_stream()))
        } else {
            None
        };

        let upstream = self
            .send(
                target,
                request.method,
                &request.path_and_query,
                &request.headers,
                body,
            )
            .await?;

        Ok(into_streaming_response(upstream))
    }
}

/// Whether the client declared a request body worth streaming upstream.
fn has_request_body(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|len| len != "0")
        || headers.contains_key(TRANSFER_ENCODING)
}

/// Handles the diverted user-creation flow.
#[async_trait]
pub trait CredentialService: Send + Sync {
    async fn handle_login(
        &self,
        username: &str,
        request: ForwardRequest,
        target: &RegistryTarget,
    ) -> Result<Response, ProxyError>;
}

/// Relays the adduser PUT to the private registry unchanged.
///
/// Deployments with a bespoke user-provisioning flow supply their own
/// `CredentialService` implementation instead.
pub struct PassthroughCredentials {
    forwarder: Arc<dyn Forwarder>,
}

impl PassthroughCredentials {
    pub fn new(forwarder: Arc<dyn Forwarder>) -> Self {
        Self { forwarder }
    }
}

#[async_trait]
impl CredentialService for PassthroughCredentials {
    async fn handle_login(
        &self,
        username: &str,
        request: ForwardRequest,
        target: &RegistryTarget,
    ) -> Result<Response, ProxyError> {
        info!("Relaying user creation for {} to {}", username, target);
        self.forwarder.forward(request, target).await
    }
}

/// Turn an upstream reply into a client response without buffering the body.
fn into_streaming_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();

    // Hop-by-hop fields do not survive the proxy boundary.
    for name in ["connection", "keep-alive", "transfer-encoding"] {
        headers.remove(name);
    }

    let body = Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other));

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_body_detection_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(!has_request_body(&headers));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        assert!(!has_request_body(&headers));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));
        assert!(has_request_body(&headers));

        let mut chunked = HeaderMap::new();
        chunked.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(has_request_body(&chunked));
    }
}

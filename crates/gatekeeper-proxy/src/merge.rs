//! Dual-upstream response merge
//!
//! The merger answers a request by contacting the private registry and the
//! current public mirror concurrently and reconciling the two responses.
//! Reconciliation is keyed by the declared content type: a mismatch fails
//! the merge, a match dispatches to a per-type combiner.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, CONTENT_TYPE};
use http::{Method, StatusCode};
use tracing::debug;

use crate::client::RegistryClient;
use crate::error::ProxyError;
use crate::target::RegistryTarget;

/// One upstream's answer, as seen by a combiner.
#[derive(Debug, Clone)]
pub struct SourceResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

/// The reconciled response handed back to the client.
#[derive(Debug, Clone)]
pub struct MergedResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

/// Combines the two source bodies into one response body.
type Combiner = fn(private: &SourceResponse, public: &SourceResponse) -> Bytes;

/// Fan-out/fan-in merger over a private and a public upstream.
pub struct Merger {
    client: Arc<RegistryClient>,
}

impl Merger {
    pub fn new(client: Arc<RegistryClient>) -> Self {
        Self { client }
    }

    /// Issue the request to both targets concurrently and reconcile.
    ///
    /// Both upstream calls carry the original method, path and headers with
    /// the `host` header rewritten per target. If the client disconnects,
    /// dropping this future aborts both in-flight requests.
    pub async fn merge(
        &self,
        private: &RegistryTarget,
        public: &RegistryTarget,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
    ) -> Result<MergedResponse, ProxyError> {
        debug!(
            "Merging {} {} across {} and {}",
            method, path_and_query, private, public
        );

        let (private_response, public_response) = tokio::try_join!(
            self.fetch(private, method.clone(), path_and_query, headers),
            self.fetch(public, method.clone(), path_and_query, headers),
        )?;

        reconcile(private_response, public_response)
    }

    async fn fetch(
        &self,
        target: &RegistryTarget,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
    ) -> Result<SourceResponse, ProxyError> {
        let response = self
            .client
            .send(target, method, path_and_query, headers, None)
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let body = response.bytes().await?;

        Ok(SourceResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Reconcile the two upstream answers into one response.
fn reconcile(
    private: SourceResponse,
    public: SourceResponse,
) -> Result<MergedResponse, ProxyError> {
    let private_type = normalize_media_type(&private.content_type);
    let public_type = normalize_media_type(&public.content_type);

    if private_type != public_type {
        return Err(ProxyError::ContentTypeMismatch {
            private: private_type,
            public: public_type,
        });
    }

    let combine = combiner_for(&public_type)
        .ok_or_else(|| ProxyError::UnsupportedContentType(public_type.clone()))?;

    let body = combine(&private, &public);

    Ok(MergedResponse {
        status: public.status,
        content_type: public.content_type,
        body,
    })
}

/// Strip parameters and normalize case: `Text/XML; charset=utf-8` -> `text/xml`.
pub fn normalize_media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Look up the combiner for a normalized media type.
///
/// All three known combiners currently serve the public response verbatim.
/// Real document-level merging (union of the two package documents) is an
/// acknowledged gap carried over from the reference behavior; unknown types
/// are rejected outright rather than silently passed through.
fn combiner_for(media_type: &str) -> Option<Combiner> {
    match media_type {
        "text/plain" => Some(serve_public),
        "text/xml" => Some(serve_public),
        "application/json" => Some(serve_public),
        _ => None,
    }
}

fn serve_public(_private: &SourceResponse, public: &SourceResponse) -> Bytes {
    public.body.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(content_type: &str, body: &str) -> SourceResponse {
        SourceResponse {
            status: StatusCode::OK,
            content_type: content_type.to_string(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_normalize_media_type_strips_parameters() {
        assert_eq!(
            normalize_media_type("application/json; charset=utf-8"),
            "application/json"
        );
        assert_eq!(normalize_media_type("Text/XML"), "text/xml");
        assert_eq!(normalize_media_type(" text/plain "), "text/plain");
    }

    #[test]
    fn test_known_types_have_combiners() {
        assert!(combiner_for("text/plain").is_some());
        assert!(combiner_for("text/xml").is_some());
        assert!(combiner_for("application/json").is_some());
    }

    #[test]
    fn test_unknown_type_is_a_failure() {
        assert!(combiner_for("application/octet-stream").is_none());
        assert!(combiner_for("image/png").is_none());
    }

    // TODO: replace with a union assertion once combiners merge the two
    // documents instead of serving the public body verbatim.
    #[test]
    fn test_combiners_serve_public_body() {
        let private = source("application/json", r#"{"name":"internal"}"#);
        let public = source("application/json", r#"{"name":"left-pad"}"#);

        let combine = combiner_for("application/json").unwrap();
        assert_eq!(combine(&private, &public), public.body);
    }

    #[test]
    fn test_reconcile_matching_types_succeeds() {
        let merged = reconcile(
            source("application/json; charset=utf-8", r#"{"a":1}"#),
            source("application/json", r#"{"b":2}"#),
        )
        .unwrap();

        assert_eq!(merged.status, StatusCode::OK);
        assert_eq!(merged.content_type, "application/json");
        assert_eq!(merged.body, Bytes::from(r#"{"b":2}"#));
    }

    #[test]
    fn test_reconcile_mismatch_names_both_types() {
        let error = reconcile(
            source("application/json", "{}"),
            source("text/xml", "<root/>"),
        )
        .unwrap_err();

        match error {
            ProxyError::ContentTypeMismatch { private, public } => {
                assert_eq!(private, "application/json");
                assert_eq!(public, "text/xml");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reconcile_unknown_type_fails() {
        let error = reconcile(
            source("application/octet-stream", ""),
            source("application/octet-stream", ""),
        )
        .unwrap_err();

        assert!(matches!(error, ProxyError::UnsupportedContentType(_)));
    }
}

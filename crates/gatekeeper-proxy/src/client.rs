//! Upstream registry client

use std::time::Duration;

use http::header::{HeaderMap, HeaderValue, HOST};
use http::Method;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info};

use crate::error::ProxyError;
use crate::target::RegistryTarget;

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// Bound on existence-probe round trips; expiry is a transport error
    pub probe_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            skip_tls_verify: false,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of an existence probe against an upstream registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The package is already registered upstream
    Found,
    /// The upstream answered 404 for the package document
    NotFound,
}

/// HTTP client shared by probes, forwarding and the merge fan-out.
///
/// The client itself is target-agnostic; every call takes the
/// `RegistryTarget` to hit, so a single connection pool serves the private
/// registry and the whole public mirror pool.
pub struct RegistryClient {
    client: Client,
    options: ClientOptions,
}

impl RegistryClient {
    /// Create a new registry client
    pub fn new(options: ClientOptions) -> Result<Self, ProxyError> {
        let mut builder = Client::builder();

        if options.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;

        info!(
            "Created registry client (probe timeout: {:?})",
            options.probe_timeout
        );

        Ok(Self { client, options })
    }

    /// Probe whether a package document already exists on `target`.
    ///
    /// A 404 means the namespace is free; any other completed 2xx/3xx
    /// response means the package is public. Transport failures and
    /// unexpected upstream statuses surface as errors and are never
    /// interpreted as "not found", so an outage cannot silently hand a
    /// public namespace to a private writer.
    pub async fn probe(
        &self,
        target: &RegistryTarget,
        package: &str,
    ) -> Result<ProbeOutcome, ProxyError> {
        let url = target.url_for(package);

        debug!("Probing package existence: {}", url);

        let mut request = self
            .client
            .get(&url)
            .timeout(self.options.probe_timeout);

        if let (Some(username), Some(password)) = (&target.username, &target.password) {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(ProbeOutcome::NotFound);
        }

        if status.is_success() || status.is_redirection() {
            return Ok(ProbeOutcome::Found);
        }

        Err(ProxyError::UpstreamError {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }

    /// Send a request to `target`, carrying the original method, path and
    /// headers with the `host` header rewritten to the target's virtual host.
    pub async fn send(
        &self,
        target: &RegistryTarget,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Option<reqwest::Body>,
    ) -> Result<Response, ProxyError> {
        let url = target.url_for(path_and_query);

        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .headers(rewrite_headers(headers, target)?);

        if let (Some(username), Some(password)) = (&target.username, &target.password) {
            request = request.basic_auth(username, Some(password));
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }
}

/// Copy request headers, dropping hop-by-hop fields and rewriting `host`
/// to the target's virtual host.
fn rewrite_headers(
    headers: &HeaderMap,
    target: &RegistryTarget,
) -> Result<HeaderMap, ProxyError> {
    const HOP_BY_HOP: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authorization",
        "te",
        "transfer-encoding",
        "upgrade",
        "content-length",
    ];

    let mut out = HeaderMap::new();

    for (name, value) in headers {
        if name == HOST || HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    let host = HeaderValue::from_str(&target.host)
        .map_err(|_| ProxyError::InvalidTarget(format!("bad virtual host: {}", target.host)))?;
    out.insert(HOST, host);

    Ok(out)
}

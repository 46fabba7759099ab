//! Registry target descriptors

use url::Url;

use crate::error::ProxyError;

/// A single upstream registry endpoint.
///
/// Targets are immutable once constructed; they are shared between the
/// routing engine, the rotator and the merger behind `Arc` and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTarget {
    /// Base URL of the registry, without a trailing slash
    pub href: String,
    /// Virtual host written into the `host` header of forwarded requests
    pub host: String,
    /// Username for basic authentication
    pub username: Option<String>,
    /// Password for basic authentication
    pub password: Option<String>,
}

impl RegistryTarget {
    /// Create a target from a base URL, deriving the virtual host from it.
    pub fn new(href: &str) -> Result<Self, ProxyError> {
        Self::with_credentials(href, None, None)
    }

    /// Create a target with optional basic-auth credentials.
    pub fn with_credentials(
        href: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ProxyError> {
        let parsed =
            Url::parse(href).map_err(|e| ProxyError::InvalidTarget(format!("{href}: {e}")))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ProxyError::InvalidTarget(format!("{href}: missing host")))?;

        let host = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self {
            href: href.trim_end_matches('/').to_string(),
            host,
            username,
            password,
        })
    }

    /// Override the virtual host used for the `host` header rewrite.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Build the absolute URL for a request path (with optional query).
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!(
            "{}/{}",
            self.href,
            path_and_query.trim_start_matches('/')
        )
    }
}

impl std::fmt::Display for RegistryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.href)
    }
}

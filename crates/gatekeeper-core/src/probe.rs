//! Existence-probe seam
//!
//! The engine talks to the prober through a trait so decision logic can be
//! exercised without network access.

use async_trait::async_trait;
use gatekeeper_proxy::{ProbeOutcome, ProxyError, RegistryClient, RegistryTarget};

/// One lightweight upstream exchange answering "does this package already
/// exist publicly?".
#[async_trait]
pub trait ExistenceProbe: Send + Sync {
    async fn probe(
        &self,
        target: &RegistryTarget,
        package: &str,
    ) -> Result<ProbeOutcome, ProxyError>;
}

#[async_trait]
impl ExistenceProbe for RegistryClient {
    async fn probe(
        &self,
        target: &RegistryTarget,
        package: &str,
    ) -> Result<ProbeOutcome, ProxyError> {
        RegistryClient::probe(self, target, package).await
    }
}

//! Routing decision engine
//!
//! Maps (HTTP method, package name, policy state) to the upstream that must
//! serve the request. Reads resolve synchronously from policy membership
//! alone; writes for unknown packages suspend on one existence probe
//! against the public write target before deciding.

use std::sync::Arc;

use http::Method;
use tracing::{debug, info};

use gatekeeper_proxy::{ProbeOutcome, RegistryTarget};

use crate::error::RouteError;
use crate::package::package_name;
use crate::policy::{CredentialMode, PolicyStore};
use crate::probe::ExistenceProbe;
use crate::rotation::Rotator;

/// External write-authorization predicate: `Some(reason)` denies the write.
pub type WriteAuthorizer = Arc<dyn Fn(&PolicyStore) -> Option<String> + Send + Sync>;

/// Where a resolved request goes.
#[derive(Clone)]
pub enum Resolution {
    /// Stream the request to this upstream
    Forward(Arc<RegistryTarget>),
    /// Divert to the credential service instead of the forwarder
    Login { username: String },
}

const USER_DOC_PREFIX: &str = "-/user/org.couchdb.user:";

pub struct RoutingEngine {
    policy: Arc<PolicyStore>,
    private_target: Arc<RegistryTarget>,
    rotator: Arc<Rotator>,
    read_override: Option<Arc<RegistryTarget>>,
    write_override: Option<Arc<RegistryTarget>>,
    prober: Arc<dyn ExistenceProbe>,
    authorize_write: Option<WriteAuthorizer>,
}

impl RoutingEngine {
    pub fn new(
        policy: Arc<PolicyStore>,
        private_target: Arc<RegistryTarget>,
        rotator: Arc<Rotator>,
        prober: Arc<dyn ExistenceProbe>,
    ) -> Self {
        Self {
            policy,
            private_target,
            rotator,
            read_override: None,
            write_override: None,
            prober,
            authorize_write: None,
        }
    }

    /// Use a dedicated public target for reads instead of the rotating one.
    pub fn with_read_target(mut self, target: Arc<RegistryTarget>) -> Self {
        self.read_override = Some(target);
        self
    }

    /// Use a dedicated public target for writes instead of the rotating one.
    pub fn with_write_target(mut self, target: Arc<RegistryTarget>) -> Self {
        self.write_override = Some(target);
        self
    }

    /// Install the external write-authorization predicate consulted before
    /// a first writer claims a namespace in standard mode.
    pub fn with_write_authorizer(mut self, authorizer: WriteAuthorizer) -> Self {
        self.authorize_write = Some(authorizer);
        self
    }

    /// The public target serving reads right now.
    pub fn public_read_target(&self) -> Arc<RegistryTarget> {
        self.read_override
            .clone()
            .unwrap_or_else(|| self.rotator.current())
    }

    /// The public target serving writes right now.
    pub fn public_write_target(&self) -> Arc<RegistryTarget> {
        self.write_override
            .clone()
            .unwrap_or_else(|| self.rotator.current())
    }

    /// Resolve one request to an upstream target or a structured denial.
    pub async fn resolve(
        &self,
        method: &Method,
        path: &str,
        referer: Option<&str>,
    ) -> Result<Resolution, RouteError> {
        // Transparent policies bypass every other rule, reads and writes alike.
        if self.policy.is_transparent() {
            return Ok(Resolution::Forward(self.public_read_target()));
        }

        // User creation diverts before any resolution runs: the user document
        // path is not a package, so it must never be probed or marked.
        if let Some(username) = self.login_divert(method, path, referer) {
            return Ok(Resolution::Login { username });
        }

        let package = package_name(path).ok_or(RouteError::UnknownPackage)?;
        let is_read = *method == Method::GET || *method == Method::HEAD;

        let target = if self.policy.has_whitelist() {
            if is_read {
                self.whitelist_read(&package)?
            } else {
                self.whitelist_write(&package).await?
            }
        } else if is_read {
            self.standard_read(&package)
        } else {
            self.standard_write(&package).await?
        };

        debug!("Resolved {} {} -> {}", method, path, target);
        Ok(Resolution::Forward(target))
    }

    fn standard_read(&self, package: &str) -> Arc<RegistryTarget> {
        if self.is_held_private(package) {
            self.private_target.clone()
        } else {
            self.public_read_target()
        }
    }

    async fn standard_write(&self, package: &str) -> Result<Arc<RegistryTarget>, RouteError> {
        if self.is_held_private(package) {
            return Ok(self.private_target.clone());
        }

        match self
            .prober
            .probe(&self.public_write_target(), package)
            .await?
        {
            // The package is legitimately public; let the public registry's
            // own conflict rules apply to the write.
            ProbeOutcome::Found => Ok(self.public_write_target()),
            // First writer claims the namespace.
            ProbeOutcome::NotFound => {
                if let Some(authorize) = &self.authorize_write
                    && let Some(reason) = authorize(&self.policy)
                {
                    return Err(RouteError::Denied(reason));
                }

                self.policy.mark_private(package);
                info!("Package {} claimed as private", package);
                Ok(self.private_target.clone())
            }
        }
    }

    fn whitelist_read(&self, package: &str) -> Result<Arc<RegistryTarget>, RouteError> {
        // Blacklist/private membership always beats the whitelist.
        if self.is_held_private(package) {
            return Ok(self.private_target.clone());
        }

        if self.policy.is_whitelisted(package) {
            return Ok(self.public_read_target());
        }

        Err(RouteError::Denied(format!(
            "package {package} is not whitelisted"
        )))
    }

    async fn whitelist_write(&self, package: &str) -> Result<Arc<RegistryTarget>, RouteError> {
        if self.is_held_private(package) {
            return Ok(self.private_target.clone());
        }

        if self.policy.is_whitelisted(package) {
            return Ok(self.public_write_target());
        }

        match self
            .prober
            .probe(&self.public_write_target(), package)
            .await?
        {
            // Unlike standard mode, an existing public package outside the
            // whitelist is a hard denial, not a forwarded write.
            ProbeOutcome::Found => Err(RouteError::Denied(format!(
                "package {package} exists upstream and is not whitelisted"
            ))),
            ProbeOutcome::NotFound => {
                self.policy.check_and_mark(package)?;
                info!("Package {} claimed as private", package);
                Ok(self.private_target.clone())
            }
        }
    }

    fn is_held_private(&self, package: &str) -> bool {
        self.policy.is_private(package) || self.policy.is_blacklisted(package)
    }

    /// Match the user-creation divert: PUT of a user document carrying the
    /// `adduser` referer marker, with a credential flow enabled.
    fn login_divert(&self, method: &Method, path: &str, referer: Option<&str>) -> Option<String> {
        if self.policy.credential_mode() == CredentialMode::Off {
            return None;
        }

        if *method != Method::PUT || referer != Some("adduser") {
            return None;
        }

        let rest = path.trim_start_matches('/').strip_prefix(USER_DOC_PREFIX)?;
        let username = rest.split('/').next().unwrap_or(rest);

        if username.is_empty() {
            return None;
        }

        Some(username.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::policy::{PolicyLimits, PolicySpec};
    use async_trait::async_trait;
    use gatekeeper_proxy::ProxyError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockProbe {
        outcome: Option<ProbeOutcome>,
        calls: AtomicUsize,
    }

    impl MockProbe {
        fn found() -> Self {
            Self {
                outcome: Some(ProbeOutcome::Found),
                calls: AtomicUsize::new(0),
            }
        }

        fn not_found() -> Self {
            Self {
                outcome: Some(ProbeOutcome::NotFound),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                outcome: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExistenceProbe for MockProbe {
        async fn probe(
            &self,
            _target: &RegistryTarget,
            _package: &str,
        ) -> Result<ProbeOutcome, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
                .ok_or_else(|| ProxyError::InvalidResponse("probe transport down".to_string()))
        }
    }

    const PRIVATE: &str = "https://registry.corp.example.com";
    const PUBLIC: &str = "https://mirror-a.example.com";

    fn engine(spec: PolicySpec, probe: Arc<MockProbe>) -> RoutingEngine {
        let private = Arc::new(RegistryTarget::new(PRIVATE).unwrap());
        let public = Arc::new(RegistryTarget::new(PUBLIC).unwrap());
        let rotator =
            Arc::new(Rotator::new(vec![public], EventBus::new()).unwrap());
        RoutingEngine::new(Arc::new(PolicyStore::new(spec)), private, rotator, probe)
    }

    fn forwarded(resolution: Resolution) -> Arc<RegistryTarget> {
        match resolution {
            Resolution::Forward(target) => target,
            Resolution::Login { .. } => panic!("unexpected login divert"),
        }
    }

    #[tokio::test]
    async fn test_standard_read_of_unknown_package_goes_public() {
        let probe = Arc::new(MockProbe::found());
        let engine = engine(PolicySpec::default(), probe.clone());

        let target = forwarded(
            engine
                .resolve(&Method::GET, "/left-pad", None)
                .await
                .unwrap(),
        );
        assert_eq!(target.href, PUBLIC);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_private_and_blacklisted_always_resolve_private() {
        let spec = PolicySpec {
            private: vec!["acme-secret".to_string()],
            blacklist: vec!["left-pad".to_string()],
            // Whitelisting a blacklisted name must not override it
            whitelist: Some(vec!["left-pad".to_string()]),
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::found());
        let engine = engine(spec, probe.clone());

        for (method, pkg) in [
            (Method::GET, "/acme-secret"),
            (Method::PUT, "/acme-secret"),
            (Method::GET, "/left-pad"),
            (Method::PUT, "/left-pad"),
        ] {
            let target = forwarded(engine.resolve(&method, pkg, None).await.unwrap());
            assert_eq!(target.href, PRIVATE, "{method} {pkg}");
        }
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_writer_claims_the_namespace() {
        let probe = Arc::new(MockProbe::not_found());
        let engine = engine(PolicySpec::default(), probe.clone());

        let target = forwarded(
            engine
                .resolve(&Method::PUT, "/acme-internal", None)
                .await
                .unwrap(),
        );
        assert_eq!(target.href, PRIVATE);
        assert_eq!(probe.calls(), 1);

        // Now known private: subsequent reads skip the probe entirely.
        let target = forwarded(
            engine
                .resolve(&Method::GET, "/acme-internal", None)
                .await
                .unwrap(),
        );
        assert_eq!(target.href, PRIVATE);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_standard_write_of_public_package_goes_public() {
        let probe = Arc::new(MockProbe::found());
        let engine = engine(PolicySpec::default(), probe.clone());

        let target = forwarded(
            engine
                .resolve(&Method::PUT, "/left-pad", None)
                .await
                .unwrap(),
        );
        assert_eq!(target.href, PUBLIC);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_propagates_and_claims_nothing() {
        let probe = Arc::new(MockProbe::failing());
        let engine = engine(PolicySpec::default(), probe.clone());

        let result = engine.resolve(&Method::PUT, "/acme-internal", None).await;
        assert!(matches!(result, Err(RouteError::Probe(_))));

        // An outage must not hand out the namespace.
        let target = forwarded(
            engine
                .resolve(&Method::GET, "/acme-internal", None)
                .await
                .unwrap(),
        );
        assert_eq!(target.href, PUBLIC);
    }

    #[tokio::test]
    async fn test_write_authorizer_denial() {
        let probe = Arc::new(MockProbe::not_found());
        let engine = engine(PolicySpec::default(), probe.clone()).with_write_authorizer(
            Arc::new(|_policy| Some("publishing disabled for this tenant".to_string())),
        );

        match engine.resolve(&Method::PUT, "/acme-internal", None).await {
            Err(RouteError::Denied(reason)) => {
                assert_eq!(reason, "publishing disabled for this tenant");
            }
            other => panic!("expected denial, got {:?}", other.err()),
        }

        // The denied write must not have marked the package private.
        let target = forwarded(
            engine
                .resolve(&Method::GET, "/acme-internal", None)
                .await
                .unwrap(),
        );
        assert_eq!(target.href, PUBLIC);
    }

    #[tokio::test]
    async fn test_whitelist_read_resolves_public() {
        let spec = PolicySpec {
            whitelist: Some(vec!["left-pad".to_string()]),
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::found());
        let engine = engine(spec, probe.clone());

        let target = forwarded(
            engine
                .resolve(&Method::GET, "/left-pad", None)
                .await
                .unwrap(),
        );
        assert_eq!(target.href, PUBLIC);
    }

    #[tokio::test]
    async fn test_whitelist_read_denies_without_probing() {
        let spec = PolicySpec {
            whitelist: Some(vec![]),
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::found());
        let engine = engine(spec, probe.clone());

        let result = engine.resolve(&Method::GET, "/leftover", None).await;
        assert!(matches!(result, Err(RouteError::Denied(_))));
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_whitelist_write_of_existing_public_package_denied() {
        let spec = PolicySpec {
            whitelist: Some(vec![]),
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::found());
        let engine = engine(spec, probe.clone());

        match engine.resolve(&Method::PUT, "/leftover", None).await {
            Err(RouteError::Denied(reason)) => assert!(reason.contains("leftover")),
            other => panic!("expected denial, got {:?}", other.err()),
        }
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_whitelist_write_quota() {
        let spec = PolicySpec {
            whitelist: Some(vec![]),
            limits: Some(PolicyLimits { private: 2 }),
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::not_found());
        let engine = engine(spec, probe.clone());

        for pkg in ["/alpha", "/beta"] {
            let target = forwarded(engine.resolve(&Method::PUT, pkg, None).await.unwrap());
            assert_eq!(target.href, PRIVATE);
        }

        let result = engine.resolve(&Method::PUT, "/gamma", None).await;
        assert!(matches!(
            result,
            Err(RouteError::QuotaExceeded { limit: 2 })
        ));
    }

    #[tokio::test]
    async fn test_transparent_routes_everything_public() {
        let spec = PolicySpec {
            private: vec!["acme-secret".to_string()],
            transparent: true,
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::found());
        let engine = engine(spec, probe.clone());

        for method in [Method::GET, Method::PUT, Method::DELETE] {
            let target = forwarded(
                engine
                    .resolve(&method, "/acme-secret", None)
                    .await
                    .unwrap(),
            );
            assert_eq!(target.href, PUBLIC, "{method}");
        }
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_dedicated_write_target_used_for_public_writes() {
        let write = Arc::new(RegistryTarget::new("https://write.example.com").unwrap());
        let probe = Arc::new(MockProbe::found());
        let engine =
            engine(PolicySpec::default(), probe.clone()).with_write_target(write.clone());

        let target = forwarded(
            engine
                .resolve(&Method::PUT, "/left-pad", None)
                .await
                .unwrap(),
        );
        assert_eq!(target.href, write.href);

        // Reads still go through the rotating pool.
        let target = forwarded(
            engine
                .resolve(&Method::GET, "/left-pad", None)
                .await
                .unwrap(),
        );
        assert_eq!(target.href, PUBLIC);
    }

    #[tokio::test]
    async fn test_adduser_put_diverts_to_credential_service() {
        let spec = PolicySpec {
            credential_mode: CredentialMode::Simple,
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::not_found());
        let engine = engine(spec, probe.clone());

        let resolution = engine
            .resolve(
                &Method::PUT,
                "/-/user/org.couchdb.user:alice",
                Some("adduser"),
            )
            .await
            .unwrap();

        match resolution {
            Resolution::Login { username } => assert_eq!(username, "alice"),
            Resolution::Forward(_) => panic!("expected credential divert"),
        }
    }

    #[tokio::test]
    async fn test_adduser_put_without_referer_is_not_diverted() {
        let spec = PolicySpec {
            credential_mode: CredentialMode::Simple,
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::not_found());
        let engine = engine(spec, probe.clone());

        let resolution = engine
            .resolve(&Method::PUT, "/-/user/org.couchdb.user:alice", None)
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Forward(_)));
    }

    #[tokio::test]
    async fn test_credential_mode_off_never_diverts() {
        let probe = Arc::new(MockProbe::not_found());
        let engine = engine(PolicySpec::default(), probe.clone());

        let resolution = engine
            .resolve(
                &Method::PUT,
                "/-/user/org.couchdb.user:alice",
                Some("adduser"),
            )
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Forward(_)));
    }

    #[tokio::test]
    async fn test_adduser_divert_never_touches_the_policy_store() {
        let spec = PolicySpec {
            credential_mode: CredentialMode::Simple,
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::not_found());
        let engine = engine(spec, probe.clone());

        let resolution = engine
            .resolve(
                &Method::PUT,
                "/-/user/org.couchdb.user:alice",
                Some("adduser"),
            )
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Login { .. }));
        assert_eq!(probe.calls(), 0);

        // Registry meta endpoints share the `-` first segment; the divert
        // must not have claimed it as a private package.
        let target = forwarded(engine.resolve(&Method::GET, "/-/whoami", None).await.unwrap());
        assert_eq!(target.href, PUBLIC);
    }

    #[tokio::test]
    async fn test_adduser_divert_precedes_whitelist_denial() {
        let spec = PolicySpec {
            whitelist: Some(vec![]),
            credential_mode: CredentialMode::Simple,
            ..Default::default()
        };
        let probe = Arc::new(MockProbe::found());
        let engine = engine(spec, probe.clone());

        let resolution = engine
            .resolve(
                &Method::PUT,
                "/-/user/org.couchdb.user:alice",
                Some("adduser"),
            )
            .await
            .unwrap();

        match resolution {
            Resolution::Login { username } => assert_eq!(username, "alice"),
            Resolution::Forward(_) => panic!("expected credential divert"),
        }
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_writes_agree_on_private() {
        let probe = Arc::new(MockProbe::not_found());
        let engine = Arc::new(engine(PolicySpec::default(), probe.clone()));

        // Both writers may observe "not found" before either marks the
        // package; the outcome is the same private target either way.
        let (a, b) = tokio::join!(
            engine.resolve(&Method::PUT, "/acme-internal", None),
            engine.resolve(&Method::PUT, "/acme-internal", None),
        );

        assert_eq!(forwarded(a.unwrap()).href, PRIVATE);
        assert_eq!(forwarded(b.unwrap()).href, PRIVATE);
    }

    #[tokio::test]
    async fn test_root_path_is_unknown_package() {
        let probe = Arc::new(MockProbe::found());
        let engine = engine(PolicySpec::default(), probe.clone());

        let result = engine.resolve(&Method::GET, "/", None).await;
        assert!(matches!(result, Err(RouteError::UnknownPackage)));
    }
}

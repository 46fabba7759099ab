//! Routing policy store
//!
//! Holds the private/blacklist/whitelist package sets, the private-package
//! quota and the transparent flag. The only runtime mutation is
//! `mark_private` (and its quota-checked sibling `check_and_mark`), invoked
//! by the write-provisioning path when a first writer claims a namespace.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RouteError;

/// How user-creation requests are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
    /// Forward adduser traffic like any other write
    #[default]
    Off,
    /// Divert adduser traffic to the credential service
    Simple,
    /// Divert and let the credential service attach custom attributes
    Custom,
}

/// Declarative policy, as loaded from configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Packages that always resolve to the private registry
    #[serde(default)]
    pub private: Vec<String>,
    /// Packages barred from the public registry regardless of whitelist
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// When present, switches the engine into whitelist mode
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,
    /// Maximum number of private packages (absent = unlimited)
    #[serde(default)]
    pub limits: Option<PolicyLimits>,
    /// Route every request to the public registry, skipping all other logic
    #[serde(default)]
    pub transparent: bool,
    /// User-creation handling
    #[serde(default)]
    pub credential_mode: CredentialMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyLimits {
    pub private: usize,
}

/// Shared, mutable policy state.
///
/// The private set is guarded by a single mutex so the whitelist write
/// path's quota check-and-mark is atomic; concurrent first-writes for the
/// same package are idempotent no-ops on the second insert.
pub struct PolicyStore {
    private: Mutex<HashSet<String>>,
    blacklist: HashSet<String>,
    whitelist: Option<HashSet<String>>,
    private_limit: Option<usize>,
    transparent: bool,
    credential_mode: CredentialMode,
}

impl PolicyStore {
    pub fn new(spec: PolicySpec) -> Self {
        if spec.transparent
            && (!spec.private.is_empty()
                || !spec.blacklist.is_empty()
                || spec.whitelist.is_some())
        {
            warn!("transparent policy short-circuits private/blacklist/whitelist sets");
        }

        Self {
            private: Mutex::new(spec.private.into_iter().collect()),
            blacklist: spec.blacklist.into_iter().collect(),
            whitelist: spec.whitelist.map(|w| w.into_iter().collect()),
            private_limit: spec.limits.map(|l| l.private),
            transparent: spec.transparent,
            credential_mode: spec.credential_mode,
        }
    }

    /// Whether every request bypasses routing and goes public.
    pub fn is_transparent(&self) -> bool {
        self.transparent
    }

    /// Whether the engine runs in whitelist mode.
    pub fn has_whitelist(&self) -> bool {
        self.whitelist.is_some()
    }

    pub fn credential_mode(&self) -> CredentialMode {
        self.credential_mode
    }

    pub fn is_private(&self, package: &str) -> bool {
        self.private.lock().contains(package)
    }

    pub fn is_blacklisted(&self, package: &str) -> bool {
        self.blacklist.contains(package)
    }

    /// Only meaningful in whitelist mode; false otherwise.
    pub fn is_whitelisted(&self, package: &str) -> bool {
        self.whitelist
            .as_ref()
            .is_some_and(|w| w.contains(package))
    }

    /// Idempotently record a package as private. Private membership only
    /// grows; packages are never removed once marked.
    pub fn mark_private(&self, package: &str) {
        self.private.lock().insert(package.to_string());
    }

    /// Remaining private-package quota, `None` meaning unlimited.
    pub fn remaining_quota(&self) -> Option<usize> {
        self.private_limit
            .map(|limit| limit.saturating_sub(self.private.lock().len()))
    }

    /// Atomically check the quota and mark the package private.
    ///
    /// Re-marking an already-private package always succeeds, so two
    /// concurrent first-writes for the same name consume one quota slot.
    pub fn check_and_mark(&self, package: &str) -> Result<(), RouteError> {
        let mut private = self.private.lock();

        if private.contains(package) {
            return Ok(());
        }

        if let Some(limit) = self.private_limit
            && private.len() >= limit
        {
            return Err(RouteError::QuotaExceeded { limit });
        }

        private.insert(package.to_string());
        Ok(())
    }
}

//! Configuration loading and management

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gatekeeper_core::PolicySpec;
use gatekeeper_proxy::RegistryTarget;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub policy: PolicySpec,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// How requests are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    /// Resolve each request to one upstream via the decision engine
    #[default]
    Route,
    /// Fan every request out to both registries and merge
    Merge,
}

/// Proxy behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub mode: ProxyMode,
    /// Seconds between public-mirror rotations
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,
    /// Bound on existence-probe round trips, in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Skip TLS certificate verification for upstream calls
    #[serde(default)]
    pub skip_tls_verify: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: ProxyMode::default(),
            rotation_interval_secs: default_rotation_interval(),
            probe_timeout_secs: default_probe_timeout(),
            skip_tls_verify: false,
        }
    }
}

impl ProxyConfig {
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// One upstream registry endpoint as configured
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    /// Virtual host override for the `host` header rewrite
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl TargetConfig {
    pub fn to_target(&self) -> Result<Arc<RegistryTarget>> {
        let mut target = RegistryTarget::with_credentials(
            &self.url,
            self.username.clone(),
            self.password.clone(),
        )
        .with_context(|| format!("invalid registry target: {}", self.url))?;

        if let Some(host) = &self.host {
            target = target.with_host(host);
        }

        Ok(Arc::new(target))
    }
}

/// A single target or an array of targets forming the rotation pool
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(TargetConfig),
    Many(Vec<TargetConfig>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<TargetConfig> {
        match self {
            OneOrMany::One(target) => vec![target],
            OneOrMany::Many(targets) => targets,
        }
    }
}

/// Upstream registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// The private registry
    pub private: TargetConfig,
    /// Public mirror(s); more than one enables rotation
    pub public: OneOrMany,
    /// Dedicated public read target, bypassing rotation for reads
    #[serde(default)]
    pub read: Option<TargetConfig>,
    /// Dedicated public write target, bypassing rotation for writes
    #[serde(default)]
    pub write: Option<TargetConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.registry.public.clone().into_vec().is_empty() {
            anyhow::bail!("at least one public registry target is required");
        }
        Ok(())
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_rotation_interval() -> u64 {
    900
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

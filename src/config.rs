//! Gate configuration: defaults, optional JSON file, `HOSTGATE_*` environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::auth::DigestAllowlist;
use crate::policy::{ConfigError, ContainerConfig, ContainerPreset};

/// Ceiling for every `*_ms` setting.
pub const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

fn bounded_ms(ms: u64) -> chrono::Duration { chrono::Duration::milliseconds(ms.min(MAX_DURATION_MS) as i64) }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Upper bound on any session lifetime.
    pub session_horizon_ms: u64,
    pub token_expiry_ms: u64,
    /// Validity assumed when the license service returns no expiry.
    pub license_expiry_ms: u64,
    pub license_timeout_ms: u64,
    pub min_token_len: usize,
    pub maintenance_interval_ms: u64,
    pub session_shards: usize,
    pub max_containers: usize,
    pub container_preset: ContainerPreset,

    /// Empty means any non-empty digest is trusted.
    pub trusted_digests: Vec<String>,
    pub allowed_packages: Vec<String>,
    pub blocked_packages: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            session_horizon_ms: 24 * 60 * 60 * 1000,
            token_expiry_ms: 12 * 60 * 60 * 1000,
            license_expiry_ms: 24 * 60 * 60 * 1000,
            license_timeout_ms: 10_000,
            min_token_len: 32,
            maintenance_interval_ms: 60_000,
            session_shards: 16,
            max_containers: 10,
            container_preset: ContainerPreset::Workload,
            trusted_digests: Vec::new(),
            allowed_packages: Vec::new(),
            blocked_packages: Vec::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(target: "hostgate::config", var = name, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

fn parse_list_env(name: &str) -> Option<Vec<String>> {
    let raw = env::var(name).ok()?;
    Some(raw.split([',', ';']).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
}

impl GateConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let cfg: GateConfig = serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Apply `HOSTGATE_*` environment variables on top of `self`.
    pub fn from_env_over(mut self) -> Self {
        if let Some(v) = parse_env("HOSTGATE_SESSION_HORIZON_MS") { self.session_horizon_ms = v; }
        if let Some(v) = parse_env("HOSTGATE_TOKEN_EXPIRY_MS") { self.token_expiry_ms = v; }
        if let Some(v) = parse_env("HOSTGATE_LICENSE_EXPIRY_MS") { self.license_expiry_ms = v; }
        if let Some(v) = parse_env("HOSTGATE_LICENSE_TIMEOUT_MS") { self.license_timeout_ms = v; }
        if let Some(v) = parse_env("HOSTGATE_MIN_TOKEN_LEN") { self.min_token_len = v; }
        if let Some(v) = parse_env("HOSTGATE_MAINTENANCE_INTERVAL_MS") { self.maintenance_interval_ms = v; }
        if let Some(v) = parse_env("HOSTGATE_SESSION_SHARDS") { self.session_shards = v; }
        if let Some(v) = parse_env("HOSTGATE_MAX_CONTAINERS") { self.max_containers = v; }
        if let Some(v) = parse_env::<ContainerPreset>("HOSTGATE_CONTAINER_PRESET") { self.container_preset = v; }
        if let Some(v) = parse_list_env("HOSTGATE_TRUSTED_DIGESTS") { self.trusted_digests = v; }
        if let Some(v) = parse_list_env("HOSTGATE_ALLOWED_PACKAGES") { self.allowed_packages = v; }
        if let Some(v) = parse_list_env("HOSTGATE_BLOCKED_PACKAGES") { self.blocked_packages = v; }
        self
    }

    /// Defaults, then the optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        Ok(base.from_env_over())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("session_horizon_ms", self.session_horizon_ms),
            ("token_expiry_ms", self.token_expiry_ms),
            ("license_expiry_ms", self.license_expiry_ms),
            ("license_timeout_ms", self.license_timeout_ms),
            ("maintenance_interval_ms", self.maintenance_interval_ms),
        ];
        for (name, v) in positive {
            if v == 0 {
                return Err(ConfigError::Invalid { name: name.to_string(), reason: "must be greater than zero".into() });
            }
            if v > MAX_DURATION_MS {
                return Err(ConfigError::Invalid { name: name.to_string(), reason: format!("must not exceed {} ms (365 days)", MAX_DURATION_MS) });
            }
        }
        if self.session_shards == 0 {
            return Err(ConfigError::Invalid { name: "session_shards".into(), reason: "must be greater than zero".into() });
        }
        if self.max_containers == 0 {
            return Err(ConfigError::Invalid { name: "max_containers".into(), reason: "must be greater than zero".into() });
        }
        Ok(())
    }

    pub fn session_horizon(&self) -> chrono::Duration { bounded_ms(self.session_horizon_ms) }
    pub fn token_expiry(&self) -> chrono::Duration { bounded_ms(self.token_expiry_ms) }
    pub fn license_expiry(&self) -> chrono::Duration { bounded_ms(self.license_expiry_ms) }
    pub fn license_timeout(&self) -> Duration { Duration::from_millis(self.license_timeout_ms) }
    pub fn maintenance_interval(&self) -> Duration { Duration::from_millis(self.maintenance_interval_ms) }

    pub fn container_config(&self) -> ContainerConfig { ContainerConfig::from_preset(self.container_preset) }

    pub fn trust_allowlist(&self) -> DigestAllowlist {
        let mut list = DigestAllowlist::new(&self.trusted_digests);
        for p in &self.allowed_packages {
            list = list.allow_package(p.clone());
        }
        for p in &self.blocked_packages {
            list = list.block_package(p.clone());
        }
        list
    }
}

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{ConfigError, SecurityPolicy};

pub(crate) const MAX_MEMORY_CEILING: u64 = 1024 * 1024 * 1024;
pub(crate) const MAX_EVENT_QUEUE_DEPTH: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Process isolation only
    Basic,
    /// Process + data isolation
    Medium,
    /// Separate security context per container
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_ceiling_bytes: u64,
    pub event_queue_depth: usize,
    pub max_hooks: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self { memory_ceiling_bytes: 64 * 1024 * 1024, event_queue_depth: 1000, max_hooks: 64 }
    }
}

/// Named presets selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerPreset {
    Development,
    Production,
    Hardened,
    Workload,
}

impl FromStr for ContainerPreset {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(ContainerPreset::Development),
            "production" | "prod" => Ok(ContainerPreset::Production),
            "hardened" => Ok(ContainerPreset::Hardened),
            "workload" => Ok(ContainerPreset::Workload),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }
}

/// Sealed container configuration. Construct through `ContainerConfig::builder()` or a preset;
/// it serializes for reporting but is never deserialized, so the builder's limits always hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerConfig {
    isolation: IsolationLevel,
    limits: ResourceLimits,
    data_encryption: bool,
    policy: SecurityPolicy,
}

impl ContainerConfig {
    pub fn builder() -> ContainerConfigBuilder { ContainerConfigBuilder::default() }

    pub fn isolation(&self) -> IsolationLevel { self.isolation }
    pub fn limits(&self) -> &ResourceLimits { &self.limits }
    pub fn data_encryption(&self) -> bool { self.data_encryption }
    pub fn policy(&self) -> &SecurityPolicy { &self.policy }

    pub fn development() -> Self {
        Self { isolation: IsolationLevel::Basic, limits: ResourceLimits::default(), data_encryption: false, policy: SecurityPolicy::permissive() }
    }

    pub fn production() -> Self {
        Self { isolation: IsolationLevel::Medium, limits: ResourceLimits::default(), data_encryption: true, policy: SecurityPolicy::secure() }
    }

    pub fn hardened() -> Self {
        let limits = ResourceLimits { memory_ceiling_bytes: 128 * 1024 * 1024, event_queue_depth: 2000, max_hooks: 16 };
        Self { isolation: IsolationLevel::Full, limits, data_encryption: true, policy: SecurityPolicy::hardened() }
    }

    /// High event throughput profile for interactive host workloads.
    pub fn workload() -> Self {
        let limits = ResourceLimits { memory_ceiling_bytes: 256 * 1024 * 1024, event_queue_depth: 5000, max_hooks: 256 };
        Self { isolation: IsolationLevel::Medium, limits, data_encryption: true, policy: SecurityPolicy::workload() }
    }

    pub fn from_preset(preset: ContainerPreset) -> Self {
        match preset {
            ContainerPreset::Development => Self::development(),
            ContainerPreset::Production => Self::production(),
            ContainerPreset::Hardened => Self::hardened(),
            ContainerPreset::Workload => Self::workload(),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self { Self::production() }
}

#[derive(Debug, Clone)]
pub struct ContainerConfigBuilder {
    isolation: IsolationLevel,
    limits: ResourceLimits,
    data_encryption: bool,
    policy: SecurityPolicy,
}

impl Default for ContainerConfigBuilder {
    fn default() -> Self {
        let base = ContainerConfig::production();
        Self { isolation: base.isolation, limits: base.limits, data_encryption: base.data_encryption, policy: base.policy }
    }
}

impl ContainerConfigBuilder {
    pub fn isolation(mut self, level: IsolationLevel) -> Self { self.isolation = level; self }
    pub fn memory_ceiling(mut self, bytes: u64) -> Self { self.limits.memory_ceiling_bytes = bytes; self }
    pub fn event_queue_depth(mut self, depth: usize) -> Self { self.limits.event_queue_depth = depth; self }
    pub fn max_hooks(mut self, n: usize) -> Self { self.limits.max_hooks = n; self }
    pub fn data_encryption(mut self, on: bool) -> Self { self.data_encryption = on; self }
    pub fn policy(mut self, policy: SecurityPolicy) -> Self { self.policy = policy; self }

    pub fn build(self) -> Result<ContainerConfig, ConfigError> {
        let l = &self.limits;
        if l.memory_ceiling_bytes == 0 || l.memory_ceiling_bytes > MAX_MEMORY_CEILING {
            return Err(ConfigError::MemoryCeiling(l.memory_ceiling_bytes));
        }
        if l.event_queue_depth == 0 || l.event_queue_depth > MAX_EVENT_QUEUE_DEPTH {
            return Err(ConfigError::EventQueueDepth(l.event_queue_depth));
        }
        if l.max_hooks == 0 { return Err(ConfigError::MaxHooks); }
        Ok(ContainerConfig { isolation: self.isolation, limits: self.limits, data_encryption: self.data_encryption, policy: self.policy })
    }
}

//! Immutable policy and configuration model for isolated containers.
//! Values here are built once through validating builders and never mutated afterwards.

mod permission;
mod security_policy;
mod container_config;

pub use permission::{Permission, PermissionSet};
pub use security_policy::{capability, SecurityLevel, SecurityPolicy, SecurityPolicyBuilder};
pub use container_config::{ContainerConfig, ContainerConfigBuilder, ContainerPreset, IsolationLevel, ResourceLimits};

use thiserror::Error;

/// Rejected configuration values (policy, container config, gate config).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("capability '{0}' is both allowed and denied")]
    ConflictingCapability(String),
    #[error("memory ceiling {0} bytes is outside (0, {max}]", max = container_config::MAX_MEMORY_CEILING)]
    MemoryCeiling(u64),
    #[error("event queue depth {0} is outside [1, {max}]", max = container_config::MAX_EVENT_QUEUE_DEPTH)]
    EventQueueDepth(usize),
    #[error("max hooks must be at least 1")]
    MaxHooks,
    #[error("unknown container preset '{0}'")]
    UnknownPreset(String),
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: String, reason: String },
}

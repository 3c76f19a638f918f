//! Security policy applied to every facility of a container.
//!
//! A policy names capabilities (`data.write`, `hooks.register`, ...) that are explicitly
//! allowed or denied. Explicit deny always wins; anything unlisted is allowed only when
//! strict mode is off.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ConfigError;

/// Capability names understood by the in-process facilities.
pub mod capability {
    pub const DATA_READ: &str = "data.read";
    pub const DATA_WRITE: &str = "data.write";
    pub const EVENTS_PUBLISH: &str = "events.publish";
    pub const EVENTS_SUBSCRIBE: &str = "events.subscribe";
    pub const HOOKS_REGISTER: &str = "hooks.register";
    pub const NETWORK_ACCESS: &str = "network.access";
    pub const FILESYSTEM_ACCESS: &str = "filesystem.access";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    None,
    Basic,
    Enhanced,
    Hardened,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityPolicy {
    level: SecurityLevel,
    allowed: BTreeSet<String>,
    denied: BTreeSet<String>,
    strict: bool,
    annotations: BTreeMap<String, String>,
}

impl SecurityPolicy {
    pub fn builder() -> SecurityPolicyBuilder { SecurityPolicyBuilder::default() }

    pub fn level(&self) -> SecurityLevel { self.level }
    pub fn is_strict(&self) -> bool { self.strict }
    pub fn allowed(&self) -> &BTreeSet<String> { &self.allowed }
    pub fn denied(&self) -> &BTreeSet<String> { &self.denied }
    pub fn annotation(&self, key: &str) -> Option<&str> { self.annotations.get(key).map(|s| s.as_str()) }

    pub fn permits(&self, cap: &str) -> bool {
        if self.denied.contains(cap) { return false; }
        if self.allowed.contains(cap) { return true; }
        !self.strict
    }

    /// Development policy: everything the facilities offer, non-strict.
    pub fn permissive() -> Self {
        Self::builder()
            .level(SecurityLevel::Basic)
            .allow(capability::DATA_READ)
            .allow(capability::DATA_WRITE)
            .allow(capability::EVENTS_PUBLISH)
            .allow(capability::EVENTS_SUBSCRIBE)
            .allow(capability::HOOKS_REGISTER)
            .strict(false)
            .build_unchecked()
    }

    /// Production policy: read-mostly, no network.
    pub fn secure() -> Self {
        Self::builder()
            .level(SecurityLevel::Enhanced)
            .allow(capability::DATA_READ)
            .allow(capability::DATA_WRITE)
            .allow(capability::EVENTS_SUBSCRIBE)
            .deny(capability::NETWORK_ACCESS)
            .strict(true)
            .build_unchecked()
    }

    pub fn hardened() -> Self {
        Self::builder()
            .level(SecurityLevel::Hardened)
            .allow(capability::DATA_READ)
            .deny(capability::NETWORK_ACCESS)
            .deny(capability::FILESYSTEM_ACCESS)
            .deny(capability::HOOKS_REGISTER)
            .strict(true)
            .build_unchecked()
    }

    /// Policy for provisioned host workloads: full facility access, no raw filesystem.
    pub fn workload() -> Self {
        Self::builder()
            .level(SecurityLevel::Enhanced)
            .allow(capability::DATA_READ)
            .allow(capability::DATA_WRITE)
            .allow(capability::EVENTS_PUBLISH)
            .allow(capability::EVENTS_SUBSCRIBE)
            .allow(capability::HOOKS_REGISTER)
            .deny(capability::FILESYSTEM_ACCESS)
            .strict(true)
            .build_unchecked()
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self { Self::secure() }
}

#[derive(Debug, Clone)]
pub struct SecurityPolicyBuilder {
    level: SecurityLevel,
    allowed: BTreeSet<String>,
    denied: BTreeSet<String>,
    strict: bool,
    annotations: BTreeMap<String, String>,
}

impl Default for SecurityPolicyBuilder {
    fn default() -> Self {
        Self { level: SecurityLevel::Enhanced, allowed: BTreeSet::new(), denied: BTreeSet::new(), strict: true, annotations: BTreeMap::new() }
    }
}

impl SecurityPolicyBuilder {
    pub fn level(mut self, level: SecurityLevel) -> Self { self.level = level; self }
    pub fn allow(mut self, cap: impl Into<String>) -> Self { self.allowed.insert(cap.into()); self }
    pub fn deny(mut self, cap: impl Into<String>) -> Self { self.denied.insert(cap.into()); self }
    pub fn strict(mut self, strict: bool) -> Self { self.strict = strict; self }
    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<SecurityPolicy, ConfigError> {
        if let Some(cap) = self.allowed.intersection(&self.denied).next() {
            return Err(ConfigError::ConflictingCapability(cap.clone()));
        }
        Ok(self.build_unchecked())
    }

    // Presets are conflict-free by construction.
    fn build_unchecked(self) -> SecurityPolicy {
        SecurityPolicy { level: self.level, allowed: self.allowed, denied: self.denied, strict: self.strict, annotations: self.annotations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_wins_and_strict_controls_unlisted() {
        let strict = SecurityPolicy::secure();
        assert!(strict.permits(capability::DATA_READ));
        assert!(!strict.permits(capability::NETWORK_ACCESS));
        assert!(!strict.permits(capability::HOOKS_REGISTER), "unlisted capability denied under strict mode");

        let loose = SecurityPolicy::builder().deny(capability::NETWORK_ACCESS).strict(false).build().unwrap();
        assert!(loose.permits(capability::HOOKS_REGISTER));
        assert!(!loose.permits(capability::NETWORK_ACCESS));
    }

    #[test]
    fn conflicting_capability_rejected() {
        let err = SecurityPolicy::builder().allow("data.write").deny("data.write").build().unwrap_err();
        assert_eq!(err, ConfigError::ConflictingCapability("data.write".into()));
    }

    #[test]
    fn presets_are_ordered_by_level() {
        assert!(SecurityPolicy::permissive().level() < SecurityPolicy::secure().level());
        assert!(SecurityPolicy::secure().level() < SecurityPolicy::hardened().level());
        assert!(!SecurityPolicy::hardened().permits(capability::HOOKS_REGISTER));
        assert!(SecurityPolicy::workload().permits(capability::HOOKS_REGISTER));
    }

    #[test]
    fn annotations_round_trip() {
        let p = SecurityPolicy::builder().annotate("owner", "ops").build().unwrap();
        assert_eq!(p.annotation("owner"), Some("ops"));
        assert_eq!(p.annotation("missing"), None);
    }
}

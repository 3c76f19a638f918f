use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use xxhash_rust::xxh3::xxh3_64;

/// A capability granted to an authenticated host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    BasicHooks,
    SignatureVerification,
    AdvancedHooks,
    CustomHooks,
    NetworkOverride,
    ElevatedAccess,
    RealTimeAnalysis,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::BasicHooks => "basic_hooks",
            Permission::SignatureVerification => "signature_verification",
            Permission::AdvancedHooks => "advanced_hooks",
            Permission::CustomHooks => "custom_hooks",
            Permission::NetworkOverride => "network_override",
            Permission::ElevatedAccess => "elevated_access",
            Permission::RealTimeAnalysis => "real_time_analysis",
        }
    }

    /// Privileged permissions are only ever issued by the license service.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Permission::NetworkOverride | Permission::ElevatedAccess | Permission::RealTimeAnalysis)
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Ordered set of permissions. Ordering keeps `fingerprint` stable across processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self { Self(BTreeSet::new()) }

    /// Minimal set for signature-only authentication.
    pub fn basic() -> Self { [Permission::BasicHooks, Permission::SignatureVerification].into_iter().collect() }

    /// Set issued for a well-formed bearer token.
    pub fn token_grant() -> Self { [Permission::BasicHooks, Permission::AdvancedHooks].into_iter().collect() }

    /// Broadest set, issued on license success when the service does not narrow it.
    pub fn license_grant() -> Self {
        [
            Permission::BasicHooks,
            Permission::AdvancedHooks,
            Permission::CustomHooks,
            Permission::NetworkOverride,
            Permission::ElevatedAccess,
            Permission::RealTimeAnalysis,
        ]
        .into_iter()
        .collect()
    }

    pub fn insert(&mut self, p: Permission) -> bool { self.0.insert(p) }
    pub fn contains(&self, p: Permission) -> bool { self.0.contains(&p) }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn iter(&self) -> impl Iterator<Item = &Permission> { self.0.iter() }

    pub fn extend_from(&mut self, other: &PermissionSet) { self.0.extend(other.0.iter().copied()); }

    pub fn union(&self, other: &PermissionSet) -> PermissionSet {
        let mut out = self.clone();
        out.extend_from(other);
        out
    }

    pub fn is_privileged(&self) -> bool { self.0.iter().any(|p| p.is_privileged()) }

    /// Stable 64-bit fingerprint over the sorted permission names, lowercase hex.
    pub fn fingerprint(&self) -> String {
        let joined = self.0.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(",");
        format!("{:016x}", xxh3_64(joined.as_bytes()))
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self { Self(iter.into_iter().collect()) }
}

impl Display for PermissionSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names = self.0.iter().map(|p| p.as_str()).collect::<Vec<_>>();
        write!(f, "{{{}}}", names.join(","))
    }
}

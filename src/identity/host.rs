use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};

/// Stable identifier for a host application install.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    /// Derive from package name and install identifier: first 16 bytes of
    /// `sha256(package ":" install)`, lowercase hex.
    pub fn derive(package_name: &str, install_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(package_name.as_bytes());
        hasher.update(b":");
        hasher.update(install_id.as_bytes());
        Self(hex::encode(&hasher.finalize()[..16]))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl Display for HostId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

/// Identity of a calling host application. Immutable once constructed; shared by
/// reference (`Arc<HostIdentity>`) with the sessions and containers created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    host_id: HostId,
    package_name: String,
    display_name: String,
    #[serde(default)]
    platform_ref: Option<String>,
    #[serde(default)]
    signature_digest: Option<String>,
    created_at: DateTime<Utc>,
}

impl HostIdentity {
    pub fn new(
        package_name: impl Into<String>,
        install_id: &str,
        display_name: impl Into<String>,
        signature_digest: Option<String>,
    ) -> Self {
        let package_name = package_name.into();
        Self {
            host_id: HostId::derive(&package_name, install_id),
            package_name,
            display_name: display_name.into(),
            platform_ref: None,
            signature_digest: signature_digest.map(|d| d.trim().to_ascii_lowercase()),
            created_at: Utc::now(),
        }
    }

    /// Attach an opaque platform handle (process/context reference supplied by the embedder).
    pub fn with_platform_ref(mut self, platform_ref: impl Into<String>) -> Self {
        self.platform_ref = Some(platform_ref.into());
        self
    }

    pub fn host_id(&self) -> &HostId { &self.host_id }
    pub fn package_name(&self) -> &str { &self.package_name }
    pub fn display_name(&self) -> &str { &self.display_name }
    pub fn platform_ref(&self) -> Option<&str> { self.platform_ref.as_deref() }
    pub fn signature_digest(&self) -> Option<&str> { self.signature_digest.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
}

impl Display for HostIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.display_name, self.package_name, self.host_id)
    }
}

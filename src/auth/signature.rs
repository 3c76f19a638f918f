use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::{Authenticator, AuthenticatorOutcome};
use crate::error::GateResult;
use crate::identity::{AuthenticationRequest, HostIdentity};
use crate::policy::PermissionSet;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("no signature available for {0}")]
    NotFound(String),
    #[error("signature unreadable: {0}")]
    Unreadable(String),
}

/// Where the signing digest of a host comes from.
pub trait SignatureSource: Send + Sync {
    fn digest_for(&self, host: &HostIdentity) -> Result<String, SignatureError>;
}

/// Uses the digest the host declared at identity construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredSignatureSource;

impl SignatureSource for DeclaredSignatureSource {
    fn digest_for(&self, host: &HostIdentity) -> Result<String, SignatureError> {
        match host.signature_digest() {
            Some(d) if !d.is_empty() => Ok(d.to_string()),
            _ => Err(SignatureError::NotFound(host.package_name().to_string())),
        }
    }
}

/// Decides whether a verified digest is trusted for a host. `Err` carries the denial reason.
pub trait TrustPredicate: Send + Sync {
    fn is_trusted(&self, host: &HostIdentity, digest: &str) -> Result<(), String>;
}

/// Package allow/block lists plus a set of trusted digests.
/// An empty digest list trusts every non-empty digest.
#[derive(Debug, Clone, Default)]
pub struct DigestAllowlist {
    trusted_digests: HashSet<String>,
    allowed_packages: HashSet<String>,
    blocked_packages: HashSet<String>,
}

impl DigestAllowlist {
    pub fn new<I, S>(trusted_digests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let trusted_digests = trusted_digests.into_iter().map(|d| d.as_ref().trim().to_ascii_lowercase()).filter(|d| !d.is_empty()).collect();
        Self { trusted_digests, ..Default::default() }
    }

    pub fn allow_package(mut self, package: impl Into<String>) -> Self {
        self.allowed_packages.insert(package.into());
        self
    }

    pub fn block_package(mut self, package: impl Into<String>) -> Self {
        self.blocked_packages.insert(package.into());
        self
    }

    pub fn is_open(&self) -> bool { self.trusted_digests.is_empty() }
}

impl TrustPredicate for DigestAllowlist {
    fn is_trusted(&self, host: &HostIdentity, digest: &str) -> Result<(), String> {
        let pkg = host.package_name();
        if self.blocked_packages.contains(pkg) {
            return Err(format!("package {} is blocked", pkg));
        }
        if !self.allowed_packages.is_empty() && !self.allowed_packages.contains(pkg) {
            return Err(format!("package {} is not in the allowed list", pkg));
        }
        if digest.is_empty() {
            return Err("empty signature digest".into());
        }
        if self.trusted_digests.is_empty() {
            return Ok(());
        }
        if self.trusted_digests.contains(&digest.to_ascii_lowercase()) {
            Ok(())
        } else {
            Err("signature digest is not trusted".into())
        }
    }
}

/// Step 1 of the pipeline. Fails closed: every error becomes a denial outcome.
pub struct SignatureAuthenticator {
    source: Arc<dyn SignatureSource>,
    trust: Arc<dyn TrustPredicate>,
}

impl SignatureAuthenticator {
    pub const NAME: &'static str = "signature";

    pub fn new(source: Arc<dyn SignatureSource>, trust: Arc<dyn TrustPredicate>) -> Self { Self { source, trust } }

    pub fn check(&self, host: &HostIdentity) -> AuthenticatorOutcome {
        let digest = match self.source.digest_for(host) {
            Ok(d) => d.trim().to_ascii_lowercase(),
            Err(e) => {
                warn!(target: "hostgate::auth", host = %host.host_id(), error = %e, "signature unavailable");
                return AuthenticatorOutcome::failure(Self::NAME, e.to_string());
            }
        };
        if let Some(declared) = host.signature_digest() {
            if declared != digest {
                warn!(target: "hostgate::auth", host = %host.host_id(), "declared digest does not match signature source");
                return AuthenticatorOutcome::failure(Self::NAME, "declared digest does not match signature source");
            }
        }
        if let Err(reason) = self.trust.is_trusted(host, &digest) {
            warn!(target: "hostgate::auth", host = %host.host_id(), reason = %reason, "signature not trusted");
            return AuthenticatorOutcome::failure(Self::NAME, reason);
        }
        debug!(target: "hostgate::auth", host = %host.host_id(), "signature verified");
        AuthenticatorOutcome::success(Self::NAME, PermissionSet::new(), None, "signature verified").with_proof(digest)
    }
}

#[async_trait]
impl Authenticator for SignatureAuthenticator {
    fn name(&self) -> &'static str { Self::NAME }

    async fn evaluate(&self, request: &AuthenticationRequest) -> GateResult<AuthenticatorOutcome> { Ok(self.check(&request.host)) }
}

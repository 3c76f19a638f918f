//! Authentication pipeline.
//!
//! `Orchestrator::authenticate` runs the authenticators in a fixed order: signature (fatal on
//! failure), optional license service, optional bearer token, then the advisory challenge. The
//! outcomes are combined into a trust level, a permission set and an expiry before a container
//! and a session are created.

mod challenge;
mod license;
mod orchestrator;
mod signature;
mod token;

pub use challenge::{challenge_for, response_for, ChallengeAuthenticator};
pub use license::{LicenseError, LicenseGrant, LicenseIntegrator, LicenseRequest, LicenseService, LocalLicenseService};
pub use orchestrator::{combine, mint_session_token, Combined, Orchestrator};
pub use signature::{DeclaredSignatureSource, DigestAllowlist, SignatureAuthenticator, SignatureError, SignatureSource, TrustPredicate};
pub use token::TokenAuthenticator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::container::{ContainerId, ContainerRef};
use crate::error::{GateError, GateResult};
use crate::identity::{AuthenticationRequest, HostIdentity, SessionToken};
use crate::policy::PermissionSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustLevel {
    Denied,
    Basic,
    Standard,
    Premium,
}

impl Display for TrustLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrustLevel::Denied => "DENIED",
            TrustLevel::Basic => "BASIC",
            TrustLevel::Standard => "STANDARD",
            TrustLevel::Premium => "PREMIUM",
        };
        f.write_str(s)
    }
}

/// Verdict of a single authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatorOutcome {
    pub authenticator: &'static str,
    pub authenticated: bool,
    pub granted: PermissionSet,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: String,
    /// Evidence produced by the authenticator (verified digest, challenge response).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

impl AuthenticatorOutcome {
    pub fn success(authenticator: &'static str, granted: PermissionSet, expires_at: Option<DateTime<Utc>>, message: impl Into<String>) -> Self {
        Self { authenticator, authenticated: true, granted, expires_at, message: message.into(), proof: None }
    }

    pub fn failure(authenticator: &'static str, message: impl Into<String>) -> Self {
        Self { authenticator, authenticated: false, granted: PermissionSet::new(), expires_at: None, message: message.into(), proof: None }
    }

    pub fn with_proof(mut self, proof: impl Into<String>) -> Self {
        self.proof = Some(proof.into());
        self
    }
}

/// One step of the pipeline. An `Err` means the authenticator could not produce a verdict;
/// the orchestrator records it as a degradation and carries on.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn evaluate(&self, request: &AuthenticationRequest) -> GateResult<AuthenticatorOutcome>;
}

/// Final verdict of `Orchestrator::authenticate`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationResult {
    pub authenticated: bool,
    pub trust_level: TrustLevel,
    pub permissions: PermissionSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<SessionToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub host: Arc<HostIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<ContainerId>,
    #[serde(skip)]
    pub container: Option<ContainerRef>,
    /// Every verdict produced during the run, in pipeline order.
    pub outcomes: Vec<AuthenticatorOutcome>,
    /// Non-signature authenticators that failed or could not run.
    pub degraded: Vec<GateError>,
    pub message: String,
}

impl AuthenticationResult {
    pub(crate) fn denied(host: Arc<HostIdentity>, outcomes: Vec<AuthenticatorOutcome>, message: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            trust_level: TrustLevel::Denied,
            permissions: PermissionSet::new(),
            session_token: None,
            expires_at: None,
            host,
            container_id: None,
            container: None,
            outcomes,
            degraded: Vec::new(),
            message: message.into(),
        }
    }

    pub fn is_degraded(&self) -> bool { !self.degraded.is_empty() }

    /// Response computed by the challenge step, if it ran.
    pub fn challenge_proof(&self) -> Option<&str> {
        self.outcomes.iter().find(|o| o.authenticator == ChallengeAuthenticator::NAME).and_then(|o| o.proof.as_deref())
    }
}

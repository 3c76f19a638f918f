use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use super::{Authenticator, AuthenticatorOutcome};
use crate::error::{GateError, GateResult};
use crate::identity::{AuthenticationRequest, HostIdentity};
use crate::policy::PermissionSet;

fn sha256_hex(input: &str) -> String { hex::encode(Sha256::digest(input.as_bytes())) }

/// `sha256(host_id ":" package ":" timestamp_ms)`, lowercase hex.
pub fn challenge_for(host: &HostIdentity, at_ms: i64) -> String {
    sha256_hex(&format!("{}:{}:{}", host.host_id(), host.package_name(), at_ms))
}

/// `sha256(challenge ":" digest)`, lowercase hex.
pub fn response_for(challenge: &str, digest: &str) -> String { sha256_hex(&format!("{}:{}", challenge, digest)) }

/// Advisory step: binds the signing digest to a fresh challenge. Never changes trust or
/// permissions; the response is kept as proof for auditing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChallengeAuthenticator;

impl ChallengeAuthenticator {
    pub const NAME: &'static str = "challenge";

    pub fn verify(host: &HostIdentity, at_ms: i64, digest: &str, response: &str) -> bool {
        response_for(&challenge_for(host, at_ms), digest) == response
    }

    /// Answer a fresh challenge with `digest`, normally the digest the signature step verified.
    pub fn respond(host: &HostIdentity, digest: &str) -> AuthenticatorOutcome {
        let at_ms = Utc::now().timestamp_millis();
        let response = response_for(&challenge_for(host, at_ms), digest);
        AuthenticatorOutcome::success(Self::NAME, PermissionSet::new(), None, format!("sha256 challenge issued at {}", at_ms))
            .with_proof(response)
    }
}

#[async_trait]
impl Authenticator for ChallengeAuthenticator {
    fn name(&self) -> &'static str { Self::NAME }

    async fn evaluate(&self, request: &AuthenticationRequest) -> GateResult<AuthenticatorOutcome> {
        let host = &request.host;
        let digest = host
            .signature_digest()
            .ok_or_else(|| GateError::degraded("challenge_unavailable", "host declared no digest to bind"))?;
        Ok(Self::respond(host, digest))
    }
}

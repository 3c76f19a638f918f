use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    AuthenticationResult, Authenticator, AuthenticatorOutcome, ChallengeAuthenticator, LicenseIntegrator, SignatureAuthenticator,
    TokenAuthenticator, TrustLevel,
};
use crate::container::ContainerRegistry;
use crate::error::{GateError, GateResult};
use crate::identity::{token_hint, AuthenticationRequest, CallerContext, HostIdentity, Session, SessionStore, SessionToken};
use crate::policy::{ContainerConfig, PermissionSet};

/// Trust, permissions and expiry derived from the successful outcomes of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combined {
    pub trust_level: TrustLevel,
    pub permissions: PermissionSet,
    pub expires_at: DateTime<Utc>,
}

/// Fold successful outcomes into a trust level, a permission set and the earliest expiry.
/// A license success yields PREMIUM, else a valid token STANDARD, else BASIC. Advisory
/// outcomes contribute neither trust nor permissions.
pub fn combine(outcomes: &[AuthenticatorOutcome], horizon: DateTime<Utc>) -> Combined {
    let succeeded = |name: &str| outcomes.iter().any(|o| o.authenticated && o.authenticator == name);
    let trust_level = if succeeded(LicenseIntegrator::NAME) {
        TrustLevel::Premium
    } else if succeeded(TokenAuthenticator::NAME) {
        TrustLevel::Standard
    } else {
        TrustLevel::Basic
    };

    let mut permissions = PermissionSet::new();
    let mut expires_at = horizon;
    for o in outcomes.iter().filter(|o| o.authenticated) {
        permissions.extend_from(&o.granted);
        if let Some(exp) = o.expires_at {
            expires_at = expires_at.min(exp);
        }
    }
    if permissions.is_empty() {
        permissions = PermissionSet::basic();
    }
    Combined { trust_level, permissions, expires_at }
}

/// Opaque session token: sha256 over host id, timestamp, permission fingerprint and 16 random
/// bytes, base64url without padding.
pub fn mint_session_token(host: &HostIdentity, at: DateTime<Utc>, permissions: &PermissionSet) -> anyhow::Result<SessionToken> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| anyhow::anyhow!("entropy source failed: {}", e))?;
    let mut hasher = Sha256::new();
    hasher.update(host.host_id().as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(at.timestamp_millis().to_be_bytes());
    hasher.update(b"|");
    hasher.update(permissions.fingerprint().as_bytes());
    hasher.update(b"|");
    hasher.update(nonce);
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

// Attempts to attach a session to a live container before giving up.
const ATTACH_ATTEMPTS: usize = 3;

/// Runs the authentication pipeline and, on success, creates the container and session.
pub struct Orchestrator {
    signature: SignatureAuthenticator,
    token: TokenAuthenticator,
    license: Option<LicenseIntegrator>,
    containers: Arc<ContainerRegistry>,
    sessions: Arc<SessionStore>,
    container_config: ContainerConfig,
    session_horizon: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        signature: SignatureAuthenticator,
        token: TokenAuthenticator,
        license: Option<LicenseIntegrator>,
        containers: Arc<ContainerRegistry>,
        sessions: Arc<SessionStore>,
        container_config: ContainerConfig,
        session_horizon: Duration,
    ) -> Self {
        Self { signature, token, license, containers, sessions, container_config, session_horizon }
    }

    pub fn has_license_service(&self) -> bool { self.license.is_some() }

    /// Denials come back as `Ok` with `authenticated == false` and nothing created.
    /// Container failures come back as `Err` and leave no session behind.
    pub async fn authenticate(&self, ctx: &CallerContext, request: &AuthenticationRequest) -> GateResult<AuthenticationResult> {
        let host = request.host.clone();
        let corr = ctx.corr();
        debug!(target: "hostgate::auth", corr, host = %host.host_id(), package = host.package_name(), "authentication started");

        // 1. signature, fatal on failure
        let sig = match self.signature.evaluate(request).await {
            Ok(o) => o,
            Err(e) => AuthenticatorOutcome::failure(SignatureAuthenticator::NAME, e.to_string()),
        };
        if !sig.authenticated {
            warn!(target: "hostgate::auth", corr, host = %host.host_id(), reason = %sig.message, "authentication denied");
            let message = format!("signature verification failed: {}", sig.message);
            return Ok(AuthenticationResult::denied(host, vec![sig], message));
        }

        let mut outcomes = vec![sig];
        let mut degraded: Vec<GateError> = Vec::new();

        // 2. license service
        if request.wants_license() {
            match &self.license {
                Some(license) => match license.evaluate(request).await {
                    Ok(o) => {
                        if !o.authenticated {
                            degraded.push(GateError::degraded("license_rejected", o.message.clone()));
                        }
                        outcomes.push(o);
                    }
                    Err(e) => degraded.push(e),
                },
                None => degraded.push(GateError::degraded("license_unconfigured", "no license service configured")),
            }
        }

        // 3. bearer token
        if request.bearer_token.is_some() {
            let o = self.token.check(request.bearer_token.as_deref());
            if !o.authenticated {
                degraded.push(GateError::degraded("token_invalid", o.message.clone()));
            }
            outcomes.push(o);
        }

        // 4. challenge, advisory; binds the digest the signature step verified
        let verified = outcomes[0].proof.clone();
        match verified.as_deref().or(host.signature_digest()) {
            Some(digest) => outcomes.push(ChallengeAuthenticator::respond(&host, digest)),
            None => degraded.push(GateError::degraded("challenge_unavailable", "no verified digest to bind")),
        }

        // 5. combine
        let now = Utc::now();
        let Some(horizon) = now.checked_add_signed(self.session_horizon) else {
            error!(target: "hostgate::auth", corr, host = %host.host_id(), horizon_ms = self.session_horizon.num_milliseconds(), "session horizon out of range");
            let mut denied = AuthenticationResult::denied(host, outcomes, "internal failure while issuing session");
            denied.degraded.push(GateError::internal("unexpected_failure", "session expiry is not representable"));
            return Ok(denied);
        };
        let combined = combine(&outcomes, horizon);

        // 6. token
        let token = match mint_session_token(&host, now, &combined.permissions) {
            Ok(t) => t,
            Err(e) => {
                error!(target: "hostgate::auth", corr, host = %host.host_id(), error = %e, "session token generation failed");
                let mut denied = AuthenticationResult::denied(host, outcomes, "internal failure while issuing session");
                denied.degraded.push(GateError::internal("unexpected_failure", e.to_string()));
                return Ok(denied);
            }
        };

        // 7 + 8. container and session. The registry counts the session against the container
        // in the same critical section that returns it, so maintenance cannot reap it here. A
        // shutdown or an explicit invalidation still can, which the re-check below catches.
        let mut attempt = 0;
        let container = loop {
            attempt += 1;
            let container = match self.containers.acquire(host.clone(), &self.container_config) {
                Ok(c) => c,
                Err(e) => {
                    error!(target: "hostgate::auth", corr, host = %host.host_id(), error = %e, "container unavailable; no session issued");
                    return Err(e);
                }
            };
            let replaced = self.sessions.put(Session {
                token: token.clone(),
                host: host.clone(),
                container: container.clone(),
                trust_level: combined.trust_level,
                permissions: combined.permissions.clone(),
                issued_at: now,
                expires_at: combined.expires_at,
            });
            if let Some(old) = replaced {
                self.containers.release(old.container.id());
            }
            if !container.is_destroyed() {
                break container;
            }
            self.sessions.invalidate(&token);
            if self.containers.is_closed() {
                warn!(target: "hostgate::auth", corr, host = %host.host_id(), "gate closed during authentication; session discarded");
                return Err(GateError::unavailable("gate_closed", "host gate was shut down during authentication"));
            }
            if attempt >= ATTACH_ATTEMPTS {
                error!(target: "hostgate::auth", corr, host = %host.host_id(), attempts = attempt, "container destroyed before session could attach");
                return Err(GateError::unavailable("container_churn", "container was destroyed while the session was being issued"));
            }
            debug!(target: "hostgate::auth", corr, host = %host.host_id(), container = %container.id(), "container destroyed before attach; retrying");
        };

        info!(
            target: "hostgate::auth",
            corr,
            host = %host.host_id(),
            trust = %combined.trust_level,
            permissions = %combined.permissions,
            token = token_hint(&token),
            container = %container.id(),
            degraded = degraded.len(),
            "host authenticated"
        );

        let message = if degraded.is_empty() {
            format!("authenticated at {}", combined.trust_level)
        } else {
            format!("authenticated at {} with {} degraded step(s)", combined.trust_level, degraded.len())
        };
        Ok(AuthenticationResult {
            authenticated: true,
            trust_level: combined.trust_level,
            permissions: combined.permissions,
            session_token: Some(token),
            expires_at: Some(combined.expires_at),
            host,
            container_id: Some(container.id().clone()),
            container: Some(container),
            outcomes,
            degraded,
            message,
        })
    }
}

use anyhow::{anyhow, Result};
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Authenticator, AuthenticatorOutcome};
use crate::error::{GateError, GateResult};
use crate::identity::{AuthenticationRequest, HostIdentity};
use crate::policy::PermissionSet;

pub const MIN_USERNAME_LEN: usize = 4;
pub const MIN_SECRET_LEN: usize = 7;

#[derive(Clone)]
pub struct LicenseRequest {
    pub username: String,
    pub secret: String,
    pub host: Arc<HostIdentity>,
}

impl Debug for LicenseRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseRequest").field("username", &self.username).field("host", &self.host.host_id()).finish_non_exhaustive()
    }
}

/// Answer from a license service. An empty `granted` set means the default license grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseGrant {
    pub success: bool,
    pub granted: PermissionSet,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl LicenseGrant {
    pub fn approved(granted: PermissionSet, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { success: true, granted, expires_at, message: "license valid".into() }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self { success: false, granted: PermissionSet::new(), expires_at: None, message: message.into() }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LicenseError {
    #[error("credentials rejected: {0}")]
    Rejected(String),
    #[error("license service unreachable: {0}")]
    Transport(String),
    #[error("license service timed out after {0} ms")]
    Timeout(u64),
    #[error("malformed license response: {0}")]
    Malformed(String),
}

/// External license/account service. Called from a spawned task under a deadline.
#[async_trait]
pub trait LicenseService: Send + Sync + 'static {
    async fn validate(&self, request: LicenseRequest) -> std::result::Result<LicenseGrant, LicenseError>;
}

/// Step 2 of the pipeline. Timeouts, transport errors and task failures degrade the
/// pipeline instead of denying it.
pub struct LicenseIntegrator {
    service: Arc<dyn LicenseService>,
    timeout: std::time::Duration,
    default_validity: Duration,
}

impl LicenseIntegrator {
    pub const NAME: &'static str = "license";

    pub fn new(service: Arc<dyn LicenseService>, timeout: std::time::Duration, default_validity: Duration) -> Self {
        Self { service, timeout, default_validity }
    }

    pub fn timeout(&self) -> std::time::Duration { self.timeout }

    fn outcome_from(&self, grant: LicenseGrant) -> AuthenticatorOutcome {
        if !grant.success {
            return AuthenticatorOutcome::failure(Self::NAME, grant.message);
        }
        let now = Utc::now();
        let expires_at = grant.expires_at.or_else(|| now.checked_add_signed(self.default_validity));
        if expires_at.is_some_and(|exp| exp <= now) {
            return AuthenticatorOutcome::failure(Self::NAME, "license has expired");
        }
        let granted = if grant.granted.is_empty() { PermissionSet::license_grant() } else { grant.granted };
        AuthenticatorOutcome::success(Self::NAME, granted, expires_at, grant.message)
    }
}

#[async_trait]
impl Authenticator for LicenseIntegrator {
    fn name(&self) -> &'static str { Self::NAME }

    async fn evaluate(&self, request: &AuthenticationRequest) -> GateResult<AuthenticatorOutcome> {
        let creds = request
            .credentials
            .as_ref()
            .ok_or_else(|| GateError::degraded("license_no_credentials", "license requested without credentials"))?;
        let call = LicenseRequest { username: creds.username.clone(), secret: creds.secret.clone(), host: request.host.clone() };
        let service = self.service.clone();
        let handle = tokio::spawn(async move { service.validate(call).await });
        let abort = handle.abort_handle();
        let host = request.host.host_id();
        match tokio::time::timeout(self.timeout, handle).await {
            Err(_) => {
                abort.abort();
                let ms = self.timeout.as_millis() as u64;
                warn!(target: "hostgate::auth", host = %host, timeout_ms = ms, "license service timed out");
                Err(GateError::degraded("license_timeout", LicenseError::Timeout(ms).to_string()))
            }
            Ok(Err(join)) => {
                warn!(target: "hostgate::auth", host = %host, error = %join, "license task failed");
                Err(GateError::degraded("license_task_failed", join.to_string()))
            }
            Ok(Ok(Err(LicenseError::Rejected(reason)))) => {
                info!(target: "hostgate::auth", host = %host, "license credentials rejected");
                Ok(AuthenticatorOutcome::failure(Self::NAME, reason))
            }
            Ok(Ok(Err(e))) => {
                warn!(target: "hostgate::auth", host = %host, error = %e, "license service error");
                Err(GateError::degraded("license_unavailable", e.to_string()))
            }
            Ok(Ok(Ok(grant))) => {
                debug!(target: "hostgate::auth", host = %host, success = grant.success, "license service answered");
                Ok(self.outcome_from(grant))
            }
        }
    }
}

struct LicenseAccount {
    phc: String,
    granted: PermissionSet,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory license accounts with Argon2id-hashed secrets.
pub struct LocalLicenseService {
    accounts: RwLock<HashMap<String, Arc<LicenseAccount>>>,
}

impl Default for LocalLicenseService {
    fn default() -> Self { Self::new() }
}

fn hasher() -> Result<Argon2<'static>> {
    let params = Params::new(8 * 1024, 2, 1, None).map_err(|e| anyhow!(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn hash_secret(secret: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let phc = hasher()?.hash_password(secret.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

fn verify_secret(phc: &str, secret: &str) -> bool {
    match (PasswordHash::new(phc), hasher()) {
        (Ok(parsed), Ok(argon2)) => argon2.verify_password(secret.as_bytes(), &parsed).is_ok(),
        _ => false,
    }
}

impl LocalLicenseService {
    pub fn new() -> Self { Self { accounts: RwLock::new(HashMap::new()) } }

    /// Add or replace an account. An empty `granted` set falls back to the default license grant.
    pub fn add_account(&self, username: &str, secret: &str, granted: PermissionSet, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        if username.len() < MIN_USERNAME_LEN {
            return Err(anyhow!("username must be at least {} characters", MIN_USERNAME_LEN));
        }
        if secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!("secret must be at least {} characters", MIN_SECRET_LEN));
        }
        let phc = hash_secret(secret)?;
        self.accounts.write().insert(username.to_string(), Arc::new(LicenseAccount { phc, granted, expires_at }));
        Ok(())
    }

    pub fn remove_account(&self, username: &str) -> bool { self.accounts.write().remove(username).is_some() }

    pub fn len(&self) -> usize { self.accounts.read().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait]
impl LicenseService for LocalLicenseService {
    async fn validate(&self, request: LicenseRequest) -> std::result::Result<LicenseGrant, LicenseError> {
        if request.username.len() < MIN_USERNAME_LEN || request.secret.len() < MIN_SECRET_LEN {
            return Err(LicenseError::Rejected("credentials do not meet minimum length".into()));
        }
        let Some(account) = self.accounts.read().get(&request.username).cloned() else {
            return Err(LicenseError::Rejected("unknown account".into()));
        };
        let phc = account.phc.clone();
        let secret = request.secret;
        let ok = tokio::task::spawn_blocking(move || verify_secret(&phc, &secret))
            .await
            .map_err(|e| LicenseError::Transport(e.to_string()))?;
        if !ok {
            return Err(LicenseError::Rejected("invalid credentials".into()));
        }
        Ok(LicenseGrant::approved(account.granted.clone(), account.expires_at))
    }
}

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use super::host::HostIdentity;

/// Username/secret pair forwarded to the external license service.
#[derive(Clone)]
pub struct ExternalCredentials {
    pub username: String,
    pub secret: String,
}

impl ExternalCredentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { username: username.into(), secret: secret.into() }
    }
}

impl Debug for ExternalCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalCredentials").field("username", &self.username).field("secret", &"<redacted>").finish()
    }
}

/// One authentication attempt. Transient: built per call and consumed by the orchestrator.
#[derive(Clone)]
pub struct AuthenticationRequest {
    pub host: Arc<HostIdentity>,
    pub bearer_token: Option<String>,
    pub credentials: Option<ExternalCredentials>,
    pub use_external_service: bool,
}

impl AuthenticationRequest {
    pub fn new(host: Arc<HostIdentity>) -> Self {
        Self { host, bearer_token: None, credentials: None, use_external_service: false }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Attach license credentials and opt into the external service.
    pub fn with_license(mut self, credentials: ExternalCredentials) -> Self {
        self.credentials = Some(credentials);
        self.use_external_service = true;
        self
    }

    /// True when step 2 of the pipeline should run.
    pub fn wants_license(&self) -> bool { self.use_external_service && self.credentials.is_some() }
}

impl Debug for AuthenticationRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationRequest")
            .field("host", &self.host.host_id())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("credentials", &self.credentials)
            .field("use_external_service", &self.use_external_service)
            .finish()
    }
}

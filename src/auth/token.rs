use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::debug;

use super::{Authenticator, AuthenticatorOutcome};
use crate::error::GateResult;
use crate::identity::{token_hint, AuthenticationRequest};
use crate::policy::PermissionSet;

const MAX_TOKEN_LEN: usize = 4096;

/// Validates an opaque bearer token by format. Grants the token permission set for a fixed window.
#[derive(Debug, Clone)]
pub struct TokenAuthenticator {
    min_len: usize,
    validity: Duration,
    grant: PermissionSet,
}

impl Default for TokenAuthenticator {
    fn default() -> Self { Self::new(32, Duration::hours(12)) }
}

impl TokenAuthenticator {
    pub const NAME: &'static str = "token";

    pub fn new(min_len: usize, validity: Duration) -> Self { Self { min_len, validity, grant: PermissionSet::token_grant() } }

    pub fn well_formed(&self, token: &str) -> bool {
        let len = token.len();
        len >= self.min_len
            && len <= MAX_TOKEN_LEN
            && token.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~' | b'+' | b'/' | b'='))
    }

    pub fn check(&self, token: Option<&str>) -> AuthenticatorOutcome {
        let Some(token) = token else {
            return AuthenticatorOutcome::failure(Self::NAME, "no bearer token supplied");
        };
        if !self.well_formed(token) {
            debug!(target: "hostgate::auth", token = token_hint(token), len = token.len(), "bearer token rejected");
            return AuthenticatorOutcome::failure(Self::NAME, "bearer token is malformed");
        }
        // an unrepresentable expiry leaves the session horizon in charge
        let expires_at = Utc::now().checked_add_signed(self.validity);
        AuthenticatorOutcome::success(Self::NAME, self.grant.clone(), expires_at, "bearer token accepted")
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    fn name(&self) -> &'static str { Self::NAME }

    async fn evaluate(&self, request: &AuthenticationRequest) -> GateResult<AuthenticatorOutcome> {
        Ok(self.check(request.bearer_token.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_rules() {
        let t = TokenAuthenticator::default();
        assert!(t.well_formed(&"a".repeat(32)));
        assert!(t.well_formed("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.sig-_x"));
        assert!(!t.well_formed(&"a".repeat(31)));
        assert!(!t.well_formed(&format!("{} ", "a".repeat(32))));
        assert!(!t.well_formed(&"a".repeat(MAX_TOKEN_LEN + 1)));
    }

    #[test]
    fn grants_token_set_with_expiry() {
        let t = TokenAuthenticator::default();
        let o = t.check(Some(&"x".repeat(40)));
        assert!(o.authenticated);
        assert_eq!(o.granted, PermissionSet::token_grant());
        let remaining = o.expires_at.unwrap() - Utc::now();
        assert!(remaining > Duration::hours(11) && remaining <= Duration::hours(12));
        assert!(!t.check(None).authenticated);
        assert!(!t.check(Some("short")).authenticated);
    }

    #[test]
    fn oversized_validity_does_not_overflow() {
        let t = TokenAuthenticator::new(8, Duration::MAX);
        let o = t.check(Some("abcdefghij"));
        assert!(o.authenticated);
        assert!(o.expires_at.is_none());
    }
}

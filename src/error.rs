//! Unified caller-facing error model.
//! Every operation exposed by the manager returns either a typed value or a `GateError`;
//! leaf failures (signature source, license service, facilities, config) carry their own
//! `thiserror` enums and are folded into this taxonomy at the orchestrator boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateError {
    Denied { code: String, message: String },
    Degraded { code: String, message: String },
    ContainerInit { code: String, message: String },
    SessionNotFound { code: String, message: String },
    SessionExpired { code: String, message: String },
    Capacity { code: String, message: String },
    Config { code: String, message: String },
    Unavailable { code: String, message: String },
    Internal { code: String, message: String },
}

impl GateError {
    pub fn code_str(&self) -> &str {
        match self {
            GateError::Denied { code, .. }
            | GateError::Degraded { code, .. }
            | GateError::ContainerInit { code, .. }
            | GateError::SessionNotFound { code, .. }
            | GateError::SessionExpired { code, .. }
            | GateError::Capacity { code, .. }
            | GateError::Config { code, .. }
            | GateError::Unavailable { code, .. }
            | GateError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            GateError::Denied { message, .. }
            | GateError::Degraded { message, .. }
            | GateError::ContainerInit { message, .. }
            | GateError::SessionNotFound { message, .. }
            | GateError::SessionExpired { message, .. }
            | GateError::Capacity { message, .. }
            | GateError::Config { message, .. }
            | GateError::Unavailable { message, .. }
            | GateError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn denied(code: impl Into<String>, msg: impl Into<String>) -> Self { GateError::Denied { code: code.into(), message: msg.into() } }
    pub fn degraded(code: impl Into<String>, msg: impl Into<String>) -> Self { GateError::Degraded { code: code.into(), message: msg.into() } }
    pub fn container_init(code: impl Into<String>, msg: impl Into<String>) -> Self { GateError::ContainerInit { code: code.into(), message: msg.into() } }
    pub fn session_not_found(code: impl Into<String>, msg: impl Into<String>) -> Self { GateError::SessionNotFound { code: code.into(), message: msg.into() } }
    pub fn session_expired(code: impl Into<String>, msg: impl Into<String>) -> Self { GateError::SessionExpired { code: code.into(), message: msg.into() } }
    pub fn capacity(code: impl Into<String>, msg: impl Into<String>) -> Self { GateError::Capacity { code: code.into(), message: msg.into() } }
    pub fn config(code: impl Into<String>, msg: impl Into<String>) -> Self { GateError::Config { code: code.into(), message: msg.into() } }
    pub fn unavailable(code: impl Into<String>, msg: impl Into<String>) -> Self { GateError::Unavailable { code: code.into(), message: msg.into() } }
    pub fn internal(code: impl Into<String>, msg: impl Into<String>) -> Self { GateError::Internal { code: code.into(), message: msg.into() } }

    /// Fatal errors leave no partial state behind and cannot be retried as-is.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GateError::Denied { .. } | GateError::ContainerInit { .. } | GateError::Config { .. } | GateError::Internal { .. })
    }

    /// Lookup-time failures: the caller should authenticate again.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, GateError::SessionNotFound { .. } | GateError::SessionExpired { .. })
    }
}

impl Display for GateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for GateError {}

pub type GateResult<T> = Result<T, GateError>;

impl From<anyhow::Error> for GateError {
    fn from(err: anyhow::Error) -> Self {
        GateError::Internal { code: "unexpected_failure".into(), message: err.to_string() }
    }
}

impl From<crate::policy::ConfigError> for GateError {
    fn from(err: crate::policy::ConfigError) -> Self {
        GateError::Config { code: "invalid_config".into(), message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_and_reauth_classification() {
        assert!(GateError::denied("signature_denied", "no").is_fatal());
        assert!(GateError::container_init("container_init_failed", "boom").is_fatal());
        assert!(!GateError::degraded("license_timeout", "slow").is_fatal());
        assert!(!GateError::session_expired("session_expired", "old").is_fatal());

        assert!(GateError::session_not_found("session_not_found", "gone").requires_reauth());
        assert!(GateError::session_expired("session_expired", "old").requires_reauth());
        assert!(!GateError::capacity("capacity", "full").requires_reauth());
    }

    #[test]
    fn display_and_serde_shape() {
        let e = GateError::session_expired("session_expired", "token abc expired");
        assert_eq!(e.to_string(), "session_expired: token abc expired");
        let j = serde_json::to_value(&e).unwrap();
        assert_eq!(j["type"], "session_expired");
        assert_eq!(j["code"], "session_expired");
        let back: GateError = serde_json::from_value(j).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn anyhow_maps_to_internal() {
        let e: GateError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(e.code_str(), "unexpected_failure");
        assert!(matches!(e, GateError::Internal { .. }));
    }
}

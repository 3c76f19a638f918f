use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use hostgate::auth::{LicenseError, LicenseGrant, LicenseRequest, LicenseService, LocalLicenseService};
use hostgate::container::{ContainerId, FacilityError, FacilityKind, FacilityProvider, InProcessFacilities, IsolatedFacility};
use hostgate::policy::{ContainerConfig, Permission, PermissionSet, SecurityPolicy};
use hostgate::{AuthenticationRequest, CallerContext, ExternalCredentials, GateConfig, GateError, HostGate, HostIdentity, TrustLevel};

const DIGEST: &str = "3f2a9c0d1e4b5a6978877665544332211000ffeeddccbbaa9988776655443322";

fn host(install: &str) -> Arc<HostIdentity> {
    Arc::new(HostIdentity::new("com.example.host", install, "Example Host", Some(DIGEST.to_string())))
}

fn ctx() -> CallerContext { CallerContext::with_new_request_id() }

fn gate(config: GateConfig) -> HostGate { HostGate::new(config).unwrap() }

struct Approves;
#[async_trait]
impl LicenseService for Approves {
    async fn validate(&self, _r: LicenseRequest) -> Result<LicenseGrant, LicenseError> { Ok(LicenseGrant::approved(PermissionSet::new(), None)) }
}

struct Hangs;
#[async_trait]
impl LicenseService for Hangs {
    async fn validate(&self, _r: LicenseRequest) -> Result<LicenseGrant, LicenseError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(LicenseGrant::approved(PermissionSet::new(), None))
    }
}

struct Slow(Duration);
#[async_trait]
impl LicenseService for Slow {
    async fn validate(&self, _r: LicenseRequest) -> Result<LicenseGrant, LicenseError> {
        tokio::time::sleep(self.0).await;
        Ok(LicenseGrant::approved(PermissionSet::new(), None))
    }
}

struct Rejecting;
impl IsolatedFacility for Rejecting {
    fn kind(&self) -> FacilityKind { FacilityKind::Other("rejecting") }
    fn initialize(&self) -> Result<(), FacilityError> { Ok(()) }
    fn apply_security_policy(&self, _p: &SecurityPolicy) -> Result<(), FacilityError> {
        Err(FacilityError::PolicyRejected { kind: self.kind(), reason: "unsupported policy".into() })
    }
    fn cleanup(&self) {}
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> { self }
}

struct RejectingProvider;
impl FacilityProvider for RejectingProvider {
    fn provision(&self, id: &ContainerId, config: &ContainerConfig) -> Result<Vec<Arc<dyn IsolatedFacility>>, FacilityError> {
        let mut v = InProcessFacilities.provision(id, config)?;
        v.push(Arc::new(Rejecting));
        Ok(v)
    }
}

#[tokio::test]
async fn signature_only_yields_basic_session() {
    let g = gate(GateConfig::default());
    let r = g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("a"))).await.unwrap();
    assert!(r.authenticated);
    assert_eq!(r.trust_level, TrustLevel::Basic);
    assert_eq!(r.permissions, PermissionSet::basic());
    assert!(r.degraded.is_empty());
    assert!(r.challenge_proof().is_some());

    let token = r.session_token.clone().unwrap();
    let v = g.validate_session(&token);
    assert!(v.is_valid());
    assert_eq!(v.session().unwrap().trust_level, TrustLevel::Basic);

    let c = g.container_for_session(&token).unwrap();
    assert_eq!(Some(c.id()), r.container_id.as_ref());
    assert!(c.data_store().is_some());
    assert_eq!(g.status().active_sessions, 1);
    assert_eq!(g.status().containers.active, 1);
}

#[tokio::test]
async fn reauthentication_reuses_the_container() {
    let g = gate(GateConfig::default());
    let h = host("a");
    let first = g.authenticate_host(&ctx(), &AuthenticationRequest::new(h.clone())).await.unwrap();
    let second = g.authenticate_host(&ctx(), &AuthenticationRequest::new(h)).await.unwrap();
    assert_ne!(first.session_token, second.session_token);
    assert_eq!(first.container_id, second.container_id);
    let stats = g.status().containers;
    assert_eq!((stats.total, stats.active), (1, 1));
}

#[tokio::test]
async fn valid_token_raises_trust_and_caps_expiry() {
    let g = gate(GateConfig::default());
    let req = AuthenticationRequest::new(host("a")).with_token("a".repeat(48));
    let r = g.authenticate_host(&ctx(), &req).await.unwrap();
    assert_eq!(r.trust_level, TrustLevel::Standard);
    assert_eq!(r.permissions, PermissionSet::token_grant());
    let remaining = r.expires_at.unwrap() - chrono::Utc::now();
    assert!(remaining <= chrono::Duration::hours(12));

    // malformed token degrades but does not deny
    let req = AuthenticationRequest::new(host("b")).with_token("short");
    let r = g.authenticate_host(&ctx(), &req).await.unwrap();
    assert!(r.authenticated);
    assert_eq!(r.trust_level, TrustLevel::Basic);
    assert_eq!(r.degraded[0].code_str(), "token_invalid");
}

#[tokio::test]
async fn license_success_is_premium() {
    let g = HostGate::builder(GateConfig::default()).license_service(Arc::new(Approves)).build().unwrap();
    let req = AuthenticationRequest::new(host("a"))
        .with_token("t".repeat(40))
        .with_license(ExternalCredentials::new("alice", "correct horse"));
    let r = g.authenticate_host(&ctx(), &req).await.unwrap();
    assert_eq!(r.trust_level, TrustLevel::Premium);
    assert!(r.permissions.contains(Permission::RealTimeAnalysis));
    assert!(r.permissions.contains(Permission::AdvancedHooks));
    assert!(r.permissions.is_privileged());
}

#[tokio::test]
async fn license_timeout_degrades_instead_of_denying() {
    let cfg = GateConfig { license_timeout_ms: 50, ..Default::default() };
    let g = HostGate::builder(cfg).license_service(Arc::new(Hangs)).build().unwrap();
    let req = AuthenticationRequest::new(host("a")).with_license(ExternalCredentials::new("alice", "correct horse"));
    let started = std::time::Instant::now();
    let r = g.authenticate_host(&ctx(), &req).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(r.authenticated);
    assert_eq!(r.trust_level, TrustLevel::Basic);
    assert_eq!(r.permissions, PermissionSet::basic());
    assert!(r.is_degraded());
    assert_eq!(r.degraded[0].code_str(), "license_timeout");
    assert!(matches!(r.degraded[0], GateError::Degraded { .. }));
}

#[tokio::test]
async fn license_without_service_is_degraded() {
    let g = gate(GateConfig::default());
    let req = AuthenticationRequest::new(host("a")).with_license(ExternalCredentials::new("alice", "correct horse"));
    let r = g.authenticate_host(&ctx(), &req).await.unwrap();
    assert_eq!(r.trust_level, TrustLevel::Basic);
    assert_eq!(r.degraded[0].code_str(), "license_unconfigured");
}

#[tokio::test]
async fn local_license_accounts_end_to_end() {
    let accounts = LocalLicenseService::new();
    accounts.add_account("alice", "correct horse", PermissionSet::new(), None).unwrap();
    let cfg = GateConfig { license_timeout_ms: 30_000, ..Default::default() };
    let g = HostGate::builder(cfg).license_service(Arc::new(accounts)).build().unwrap();

    let ok = AuthenticationRequest::new(host("a")).with_license(ExternalCredentials::new("alice", "correct horse"));
    assert_eq!(g.authenticate_host(&ctx(), &ok).await.unwrap().trust_level, TrustLevel::Premium);

    let wrong = AuthenticationRequest::new(host("b")).with_license(ExternalCredentials::new("alice", "wrong horse"));
    let r = g.authenticate_host(&ctx(), &wrong).await.unwrap();
    assert_eq!(r.trust_level, TrustLevel::Basic);
    assert_eq!(r.degraded[0].code_str(), "license_rejected");
}

#[tokio::test]
async fn invalid_signature_creates_nothing() {
    let g = gate(GateConfig::default());
    let unsigned = Arc::new(HostIdentity::new("com.example.host", "a", "Unsigned", None));
    let r = g.authenticate_host(&ctx(), &AuthenticationRequest::new(unsigned).with_token("t".repeat(40))).await.unwrap();
    assert!(!r.authenticated);
    assert_eq!(r.trust_level, TrustLevel::Denied);
    assert!(r.session_token.is_none());
    assert!(r.container.is_none());
    let st = g.status();
    assert_eq!(st.active_sessions, 0);
    assert_eq!(st.containers.total, 0);

    let untrusted = GateConfig { trusted_digests: vec!["00ff".into()], ..Default::default() };
    let g = gate(untrusted);
    let r = g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("a"))).await.unwrap();
    assert!(!r.authenticated);
    assert_eq!(g.status().containers.total, 0);
}

#[tokio::test]
async fn invalidate_is_idempotent_and_destroys_container() {
    let g = gate(GateConfig::default());
    let r = g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("a"))).await.unwrap();
    let token = r.session_token.unwrap();
    let container = r.container.unwrap();

    assert!(g.invalidate_session(&token));
    assert!(!g.invalidate_session(&token));
    assert!(container.is_destroyed());
    assert!(g.containers().get(container.id()).is_none());

    let err = g.container_for_session(&token).unwrap_err();
    assert!(matches!(err, GateError::SessionNotFound { .. }));
    assert!(!g.validate_session(&token).is_valid());
}

#[tokio::test]
async fn expiry_is_detected_without_a_sweep() {
    let g = gate(GateConfig { session_horizon_ms: 50, ..Default::default() });
    let r = g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("a"))).await.unwrap();
    let token = r.session_token.unwrap();
    let container = r.container.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    match g.validate_session(&token) {
        hostgate::SessionValidation::Invalid(e) => {
            assert!(matches!(e, GateError::SessionExpired { .. }));
            assert!(e.requires_reauth());
        }
        other => panic!("expected expiry, got {:?}", other),
    }
    // lazily removed, and its container reaped with it
    assert!(container.is_destroyed());
    assert!(matches!(g.container_for_session(&token), Err(GateError::SessionNotFound { .. })));
}

#[tokio::test]
async fn maintenance_sweeps_sessions_and_orphaned_containers() {
    let g = gate(GateConfig { session_horizon_ms: 50, ..Default::default() });
    for install in ["a", "b"] {
        g.authenticate_host(&ctx(), &AuthenticationRequest::new(host(install))).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(g.status().expired_pending, 2);

    let report = g.run_maintenance();
    assert_eq!(report.expired_sessions, 2);
    assert_eq!(report.containers_destroyed, 2);
    let st = g.status();
    assert_eq!((st.active_sessions, st.containers.active, st.containers.destroyed), (0, 0, 2));
    assert_eq!(g.run_maintenance(), hostgate::MaintenanceReport::default());
}

#[tokio::test]
async fn background_maintenance_runs_until_shutdown() {
    let cfg = GateConfig { session_horizon_ms: 30, maintenance_interval_ms: 20, ..Default::default() };
    let g = Arc::new(gate(cfg));
    let handle = g.spawn_maintenance();
    g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("a"))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(g.status().active_sessions, 0);
    assert_eq!(g.status().containers.active, 0);

    g.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn container_init_failure_leaves_no_session() {
    let g = HostGate::builder(GateConfig::default()).facility_provider(Arc::new(RejectingProvider)).build().unwrap();
    let err = g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("a"))).await.unwrap_err();
    assert!(matches!(err, GateError::ContainerInit { .. }));
    assert!(err.is_fatal());
    let st = g.status();
    assert_eq!(st.active_sessions, 0);
    assert_eq!(st.containers.total, 0);
}

#[tokio::test]
async fn capacity_limit_is_reported() {
    let g = gate(GateConfig { max_containers: 1, ..Default::default() });
    g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("a"))).await.unwrap();
    let err = g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("b"))).await.unwrap_err();
    assert!(matches!(err, GateError::Capacity { .. }));
    assert_eq!(g.status().active_sessions, 1);
}

#[tokio::test]
async fn shutdown_tears_everything_down() {
    let g = gate(GateConfig::default());
    let r = g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("a"))).await.unwrap();
    g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("b"))).await.unwrap();
    assert_eq!(g.shutdown(), 2);
    assert_eq!(g.shutdown(), 0);
    assert!(r.container.unwrap().is_destroyed());

    let st = g.status();
    assert_eq!((st.active_sessions, st.containers.active), (0, 0));
    let err = g.authenticate_host(&ctx(), &AuthenticationRequest::new(host("c"))).await.unwrap_err();
    assert!(matches!(err, GateError::Unavailable { .. }));
    assert!(!g.validate_session(r.session_token.as_deref().unwrap()).is_valid());
}

#[tokio::test]
async fn shutdown_during_authentication_leaves_nothing_behind() {
    let cfg = GateConfig { license_timeout_ms: 5_000, ..Default::default() };
    let g = Arc::new(HostGate::builder(cfg).license_service(Arc::new(Slow(Duration::from_millis(300)))).build().unwrap());
    let req = AuthenticationRequest::new(host("a")).with_license(ExternalCredentials::new("alice", "correct horse"));
    let pending = {
        let g = g.clone();
        tokio::spawn(async move { g.authenticate_host(&ctx(), &req).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    g.shutdown();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, GateError::Unavailable { .. }));
    let st = g.status();
    assert_eq!((st.active_sessions, st.containers.active), (0, 0));
    assert!(g.containers().is_closed());
}

#[test]
fn invalid_config_is_rejected_at_build() {
    let err = HostGate::new(GateConfig { session_shards: 0, ..Default::default() }).err().unwrap();
    assert!(matches!(err, GateError::Config { .. }));
    let err = HostGate::new(GateConfig { session_horizon_ms: u64::MAX, ..Default::default() }).err().unwrap();
    assert!(matches!(err, GateError::Config { .. }));
}

#[tokio::test]
async fn custom_signature_source_feeds_the_challenge() {
    struct Registry;
    impl hostgate::auth::SignatureSource for Registry {
        fn digest_for(&self, _host: &HostIdentity) -> Result<String, hostgate::auth::SignatureError> { Ok("abcd".to_string()) }
    }
    let g = HostGate::builder(GateConfig::default()).signature_source(Arc::new(Registry)).build().unwrap();
    let undeclared = Arc::new(HostIdentity::new("com.example.host", "a", "Example Host", None));
    let r = g.authenticate_host(&ctx(), &AuthenticationRequest::new(undeclared)).await.unwrap();
    assert!(r.authenticated);
    assert!(r.degraded.is_empty(), "{:?}", r.degraded);
    assert!(r.challenge_proof().is_some());
}

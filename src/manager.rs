//! `HostGate`: the facade embedders talk to.
//!
//! Owns the orchestrator, the session store and the container registry. Session lookups
//! expire lazily; a background maintenance task sweeps expired sessions and releases their
//! hold on containers, which the registry reaps once no session references them.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{
    AuthenticationResult, DeclaredSignatureSource, LicenseIntegrator, LicenseService, Orchestrator, SignatureAuthenticator,
    SignatureSource, TokenAuthenticator, TrustPredicate,
};
use crate::config::GateConfig;
use crate::container::{ContainerRef, ContainerRegistry, ContainerStats, FacilityProvider, InProcessFacilities};
use crate::error::{GateError, GateResult};
use crate::identity::{token_hint, AuthenticationRequest, CallerContext, Lookup, Session, SessionStore};

/// Outcome of `HostGate::validate_session`.
#[derive(Debug, Clone)]
pub enum SessionValidation {
    Valid(Session),
    Invalid(GateError),
}

impl SessionValidation {
    pub fn is_valid(&self) -> bool { matches!(self, SessionValidation::Valid(_)) }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionValidation::Valid(s) => Some(s),
            SessionValidation::Invalid(_) => None,
        }
    }

    pub fn into_result(self) -> GateResult<Session> {
        match self {
            SessionValidation::Valid(s) => Ok(s),
            SessionValidation::Invalid(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_sessions: usize,
    pub containers_destroyed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    /// Stored sessions, including expired ones awaiting the next sweep.
    pub active_sessions: usize,
    pub expired_pending: usize,
    pub containers: ContainerStats,
}

pub struct HostGateBuilder {
    config: GateConfig,
    signature_source: Option<Arc<dyn SignatureSource>>,
    trust: Option<Arc<dyn TrustPredicate>>,
    license: Option<Arc<dyn LicenseService>>,
    facilities: Option<Arc<dyn FacilityProvider>>,
}

impl HostGateBuilder {
    pub fn signature_source(mut self, source: Arc<dyn SignatureSource>) -> Self {
        self.signature_source = Some(source);
        self
    }

    pub fn trust_predicate(mut self, trust: Arc<dyn TrustPredicate>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn license_service(mut self, service: Arc<dyn LicenseService>) -> Self {
        self.license = Some(service);
        self
    }

    pub fn facility_provider(mut self, provider: Arc<dyn FacilityProvider>) -> Self {
        self.facilities = Some(provider);
        self
    }

    pub fn build(self) -> GateResult<HostGate> {
        let cfg = self.config;
        cfg.validate()?;

        let trust: Arc<dyn TrustPredicate> = match self.trust {
            Some(t) => t,
            None => {
                let list = cfg.trust_allowlist();
                if list.is_open() {
                    warn!(target: "hostgate::config", "no trusted digests configured; any declared signature will be accepted");
                }
                Arc::new(list)
            }
        };
        let source = self.signature_source.unwrap_or_else(|| Arc::new(DeclaredSignatureSource));
        let provider = self.facilities.unwrap_or_else(|| Arc::new(InProcessFacilities));

        let sessions = Arc::new(SessionStore::new(cfg.session_shards));
        let containers = Arc::new(ContainerRegistry::with_provider(cfg.max_containers, provider));
        let license = self.license.map(|svc| LicenseIntegrator::new(svc, cfg.license_timeout(), cfg.license_expiry()));
        let orchestrator = Orchestrator::new(
            SignatureAuthenticator::new(source, trust),
            TokenAuthenticator::new(cfg.min_token_len, cfg.token_expiry()),
            license,
            containers.clone(),
            sessions.clone(),
            cfg.container_config(),
            cfg.session_horizon(),
        );
        let (stop_tx, _) = watch::channel(false);
        info!(
            target: "hostgate",
            shards = cfg.session_shards,
            max_containers = cfg.max_containers,
            preset = ?cfg.container_preset,
            license = orchestrator.has_license_service(),
            "host gate ready"
        );
        Ok(HostGate { config: cfg, orchestrator, sessions, containers, closed: AtomicBool::new(false), stop_tx })
    }
}

pub struct HostGate {
    config: GateConfig,
    orchestrator: Orchestrator,
    sessions: Arc<SessionStore>,
    containers: Arc<ContainerRegistry>,
    closed: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl HostGate {
    pub fn builder(config: GateConfig) -> HostGateBuilder {
        HostGateBuilder { config, signature_source: None, trust: None, license: None, facilities: None }
    }

    pub fn new(config: GateConfig) -> GateResult<Self> { Self::builder(config).build() }

    pub fn config(&self) -> &GateConfig { &self.config }
    pub fn containers(&self) -> &ContainerRegistry { &self.containers }
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

    fn ensure_open(&self) -> GateResult<()> {
        if self.is_closed() {
            return Err(GateError::unavailable("gate_closed", "host gate has been shut down"));
        }
        Ok(())
    }

    /// A shutdown that lands while the pipeline is in flight yields `Unavailable` and leaves
    /// neither a session nor a container behind.
    pub async fn authenticate_host(&self, ctx: &CallerContext, request: &AuthenticationRequest) -> GateResult<AuthenticationResult> {
        self.ensure_open()?;
        let result = self.orchestrator.authenticate(ctx, request).await?;
        if self.is_closed() {
            if let Some(token) = &result.session_token {
                self.invalidate_session(token);
            }
            warn!(target: "hostgate", corr = ctx.corr(), host = %result.host.host_id(), "gate closed during authentication");
            return Err(GateError::unavailable("gate_closed", "host gate was shut down during authentication"));
        }
        Ok(result)
    }

    pub fn validate_session(&self, token: &str) -> SessionValidation {
        if let Err(e) = self.ensure_open() {
            return SessionValidation::Invalid(e);
        }
        match self.sessions.lookup(token) {
            Lookup::Live(s) => SessionValidation::Valid(s),
            Lookup::Expired(s) => {
                let reaped = self.containers.release(s.container.id());
                debug!(target: "hostgate::session", token = token_hint(token), container_reaped = reaped, "session expired");
                SessionValidation::Invalid(GateError::session_expired("session_expired", format!("session expired at {}", s.expires_at)))
            }
            Lookup::Missing => SessionValidation::Invalid(GateError::session_not_found("session_not_found", "no such session")),
        }
    }

    pub fn container_for_session(&self, token: &str) -> GateResult<ContainerRef> {
        let session = self.validate_session(token).into_result()?;
        if session.container.is_destroyed() {
            return Err(GateError::session_not_found("container_destroyed", format!("container {} is gone", session.container.id())));
        }
        Ok(session.container)
    }

    /// Remove the session and destroy its container. Idempotent; returns whether a session was removed.
    pub fn invalidate_session(&self, token: &str) -> bool {
        match self.sessions.invalidate(token) {
            Some(s) => {
                self.containers.destroy(s.container.id());
                info!(target: "hostgate::session", token = token_hint(token), host = %s.host.host_id(), "session invalidated");
                true
            }
            None => false,
        }
    }

    /// Sweep expired sessions and destroy containers left without a live session.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let expired = self.sessions.drain_expired();
        let destroyed = expired.iter().filter(|s| self.containers.release(s.container.id())).count();
        let report = MaintenanceReport { expired_sessions: expired.len(), containers_destroyed: destroyed };
        if report.expired_sessions > 0 {
            info!(target: "hostgate::maintenance", expired = report.expired_sessions, destroyed = report.containers_destroyed, "maintenance sweep");
        }
        report
    }

    /// Run maintenance every `maintenance_interval_ms` until shutdown.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        let mut stop = self.stop_tx.subscribe();
        let period = self.config.maintenance_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                if *stop.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        gate.run_maintenance();
                    }
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(target: "hostgate::maintenance", "maintenance task stopped");
        })
    }

    pub fn status(&self) -> GateStatus {
        GateStatus {
            active_sessions: self.sessions.len(),
            expired_pending: self.sessions.expired_pending(),
            containers: self.containers.stats(),
        }
    }

    /// Stop maintenance, invalidate every session and destroy every container.
    /// Later calls return `Unavailable`. Returns the number of sessions invalidated.
    pub fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.stop_tx.send_replace(true);
        // close first: an in-flight authentication either fails to acquire a container or
        // finds it destroyed after storing its session and removes it again
        let containers = self.containers.close();
        let sessions = self.sessions.drain();
        info!(target: "hostgate", sessions = sessions.len(), containers, "host gate shut down");
        sessions.len()
    }
}

impl Drop for HostGate {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.shutdown();
        }
    }
}

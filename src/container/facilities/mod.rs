//! Isolated per-container facilities.
//!
//! A container owns a set of facilities handed out by a [`FacilityProvider`]. Each facility goes
//! through `initialize -> apply_security_policy -> (use) -> cleanup`; every operation on a live
//! facility is checked against the applied [`SecurityPolicy`]. The in-process provider wires a
//! bounded key/value store, a broadcast event bus and a named hook registry.

mod data_store;
mod event_bus;
mod hooks;

pub use data_store::IsolatedDataStore;
pub use event_bus::{ContainerEvent, IsolatedEventBus};
pub use hooks::{HookFn, HookRegistry};

use parking_lot::RwLock;
use std::any::Any;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::ContainerId;
use crate::policy::{ContainerConfig, SecurityPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FacilityKind {
    DataStore,
    EventBus,
    Hooks,
    Other(&'static str),
}

impl Display for FacilityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FacilityKind::DataStore => f.write_str("data_store"),
            FacilityKind::EventBus => f.write_str("event_bus"),
            FacilityKind::Hooks => f.write_str("hooks"),
            FacilityKind::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FacilityError {
    #[error("{kind} failed to initialize: {reason}")]
    Initialization { kind: FacilityKind, reason: String },
    #[error("{kind} rejected security policy: {reason}")]
    PolicyRejected { kind: FacilityKind, reason: String },
    #[error("{kind}: capability '{capability}' denied by policy")]
    Denied { kind: FacilityKind, capability: String },
    #[error("{kind}: capacity exceeded ({reason})")]
    CapacityExceeded { kind: FacilityKind, reason: String },
    #[error("{kind} is not active")]
    Inactive { kind: FacilityKind },
}

/// One isolated subsystem owned by a container.
pub trait IsolatedFacility: Send + Sync {
    fn kind(&self) -> FacilityKind;
    fn initialize(&self) -> Result<(), FacilityError>;
    fn apply_security_policy(&self, policy: &SecurityPolicy) -> Result<(), FacilityError>;
    /// Release resources. Must be idempotent and must not fail.
    fn cleanup(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Produces the facility set for a new container.
pub trait FacilityProvider: Send + Sync {
    fn provision(&self, container_id: &ContainerId, config: &ContainerConfig) -> Result<Vec<Arc<dyn IsolatedFacility>>, FacilityError>;
}

/// Default provider: data store, event bus and hook registry sized from the container limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessFacilities;

impl FacilityProvider for InProcessFacilities {
    fn provision(&self, container_id: &ContainerId, config: &ContainerConfig) -> Result<Vec<Arc<dyn IsolatedFacility>>, FacilityError> {
        let limits = config.limits();
        Ok(vec![
            Arc::new(IsolatedDataStore::new(container_id.clone(), limits.memory_ceiling_bytes)),
            Arc::new(IsolatedEventBus::new(container_id.clone(), limits.event_queue_depth)),
            Arc::new(HookRegistry::new(container_id.clone(), limits.max_hooks)),
        ])
    }
}

/// Activation flag plus the applied policy, shared by the in-process facilities.
/// No policy applied means every capability check fails.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    active: AtomicBool,
    policy: RwLock<Option<SecurityPolicy>>,
}

impl Lifecycle {
    pub(crate) fn activate(&self) { self.active.store(true, Ordering::SeqCst); }

    /// Returns whether the facility was active before the call.
    pub(crate) fn deactivate(&self) -> bool { self.active.swap(false, Ordering::SeqCst) }

    pub(crate) fn is_active(&self) -> bool { self.active.load(Ordering::SeqCst) }

    pub(crate) fn set_policy(&self, kind: FacilityKind, policy: &SecurityPolicy) -> Result<(), FacilityError> {
        if !self.is_active() {
            return Err(FacilityError::Inactive { kind });
        }
        *self.policy.write() = Some(policy.clone());
        Ok(())
    }

    pub(crate) fn check(&self, kind: FacilityKind, capability: &str) -> Result<(), FacilityError> {
        if !self.is_active() {
            return Err(FacilityError::Inactive { kind });
        }
        match self.policy.read().as_ref() {
            Some(p) if p.permits(capability) => Ok(()),
            _ => Err(FacilityError::Denied { kind, capability: capability.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::capability;

    #[test]
    fn lifecycle_gates_on_activation_and_policy() {
        let lc = Lifecycle::default();
        assert_eq!(lc.check(FacilityKind::DataStore, capability::DATA_READ), Err(FacilityError::Inactive { kind: FacilityKind::DataStore }));
        lc.activate();
        // active but no policy yet
        assert!(matches!(lc.check(FacilityKind::DataStore, capability::DATA_READ), Err(FacilityError::Denied { .. })));
        lc.set_policy(FacilityKind::DataStore, &SecurityPolicy::workload()).unwrap();
        assert!(lc.check(FacilityKind::DataStore, capability::DATA_READ).is_ok());
        assert!(matches!(lc.check(FacilityKind::DataStore, capability::FILESYSTEM_ACCESS), Err(FacilityError::Denied { .. })));
        assert!(lc.deactivate());
        assert!(!lc.deactivate());
    }

    #[test]
    fn in_process_provider_sizes_from_limits() {
        let cfg = ContainerConfig::workload();
        let id = ContainerId::from_raw("ctr_test");
        let facilities = InProcessFacilities.provision(&id, &cfg).unwrap();
        let kinds: Vec<FacilityKind> = facilities.iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, vec![FacilityKind::DataStore, FacilityKind::EventBus, FacilityKind::Hooks]);
    }
}

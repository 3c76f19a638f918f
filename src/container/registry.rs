use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Container, ContainerId, ContainerRef, FacilityProvider, InProcessFacilities};
use crate::error::{GateError, GateResult};
use crate::identity::{HostId, HostIdentity};
use crate::policy::ContainerConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// Containers ever registered.
    pub total: u64,
    pub active: usize,
    /// Containers destroyed since startup.
    pub destroyed: u64,
}

#[derive(Default)]
struct RegistryState {
    containers: HashMap<ContainerId, ContainerRef>,
    by_host: HashMap<HostId, ContainerId>,
    // sessions attached through `acquire` and not yet released
    refs: HashMap<ContainerId, usize>,
    created: u64,
    destroyed: u64,
    closed: bool,
}

impl RegistryState {
    fn remove(&mut self, id: &ContainerId) -> Option<ContainerRef> {
        let c = self.containers.remove(id)?;
        self.refs.remove(id);
        if self.by_host.get(c.host().host_id()) == Some(id) {
            self.by_host.remove(c.host().host_id());
        }
        Some(c)
    }
}

/// Owns every live container, indexed by id and by host. Both indices, the session
/// reference counts and the closed flag are updated under a single write lock, so a host
/// never maps to more than one live container and a container is never reaped while a
/// session is being attached to it.
pub struct ContainerRegistry {
    state: RwLock<RegistryState>,
    provider: Arc<dyn FacilityProvider>,
    max_containers: usize,
}

impl ContainerRegistry {
    pub fn new(max_containers: usize) -> Self { Self::with_provider(max_containers, Arc::new(InProcessFacilities)) }

    pub fn with_provider(max_containers: usize, provider: Arc<dyn FacilityProvider>) -> Self {
        Self { state: RwLock::new(RegistryState::default()), provider, max_containers }
    }

    /// Return the host's live container, or create, initialize and register a new one.
    /// A container is registered only after every facility initialized successfully.
    pub fn create(&self, host: Arc<HostIdentity>, config: &ContainerConfig) -> GateResult<ContainerRef> {
        let mut st = self.state.write();
        self.create_locked(&mut st, host, config)
    }

    /// Like `create`, and records one more session attached to the returned container in the
    /// same critical section. Pair every successful call with one `release`.
    pub fn acquire(&self, host: Arc<HostIdentity>, config: &ContainerConfig) -> GateResult<ContainerRef> {
        let mut st = self.state.write();
        let container = self.create_locked(&mut st, host, config)?;
        *st.refs.entry(container.id().clone()).or_insert(0) += 1;
        Ok(container)
    }

    /// Drop one session reference; destroys the container when none remain.
    /// Returns whether the container was destroyed.
    pub fn release(&self, id: &ContainerId) -> bool {
        let removed = {
            let mut st = self.state.write();
            let remaining = match st.refs.get_mut(id) {
                Some(n) => {
                    *n = n.saturating_sub(1);
                    *n
                }
                None => 0,
            };
            if remaining > 0 {
                return false;
            }
            let removed = st.remove(id);
            if removed.is_some() {
                st.destroyed += 1;
            }
            removed
        };
        match removed {
            Some(c) => {
                c.teardown();
                info!(target: "hostgate::container", container = %id, host = %c.host().host_id(), "unreferenced container reaped");
                true
            }
            None => false,
        }
    }

    pub fn session_refs(&self, id: &ContainerId) -> usize { self.state.read().refs.get(id).copied().unwrap_or(0) }

    fn create_locked(&self, st: &mut RegistryState, host: Arc<HostIdentity>, config: &ContainerConfig) -> GateResult<ContainerRef> {
        if st.closed {
            return Err(GateError::unavailable("gate_closed", "container registry has been closed"));
        }
        if let Some(existing) = st.by_host.get(host.host_id()).and_then(|id| st.containers.get(id)) {
            if !existing.is_destroyed() {
                debug!(target: "hostgate::container", container = %existing.id(), host = %host.host_id(), "reusing container");
                return Ok(existing.clone());
            }
        }
        if st.containers.len() >= self.max_containers {
            warn!(target: "hostgate::container", host = %host.host_id(), max = self.max_containers, "container capacity reached");
            return Err(GateError::capacity(
                "container_capacity",
                format!("registry holds the maximum of {} containers", self.max_containers),
            ));
        }
        let container = Arc::new(Container::new(host.clone(), config.clone()));
        if let Err(e) = container.initialize(self.provider.as_ref()) {
            warn!(target: "hostgate::container", host = %host.host_id(), error = %e, "container initialization failed");
            return Err(GateError::container_init("container_init_failed", e.to_string()));
        }
        // drop any stale mapping left by a destroyed container
        if let Some(stale) = st.by_host.get(host.host_id()).cloned() {
            st.remove(&stale);
        }
        st.by_host.insert(host.host_id().clone(), container.id().clone());
        st.containers.insert(container.id().clone(), container.clone());
        st.created += 1;
        info!(target: "hostgate::container", container = %container.id(), host = %host.host_id(), active = st.containers.len(), "container created");
        Ok(container)
    }

    pub fn get(&self, id: &ContainerId) -> Option<ContainerRef> { self.state.read().containers.get(id).cloned() }

    pub fn get_for_host(&self, host_id: &HostId) -> Option<ContainerRef> {
        let st = self.state.read();
        st.by_host.get(host_id).and_then(|id| st.containers.get(id)).cloned()
    }

    /// Remove from both indices and clean up. Returns false if the id was not registered.
    pub fn destroy(&self, id: &ContainerId) -> bool {
        let removed = {
            let mut st = self.state.write();
            let removed = st.remove(id);
            if removed.is_some() {
                st.destroyed += 1;
            }
            removed
        };
        match removed {
            Some(c) => {
                c.teardown();
                info!(target: "hostgate::container", container = %id, host = %c.host().host_id(), "container destroyed");
                true
            }
            None => false,
        }
    }

    pub fn destroy_for_host(&self, host_id: &HostId) -> bool {
        let id = self.state.read().by_host.get(host_id).cloned();
        id.map(|id| self.destroy(&id)).unwrap_or(false)
    }

    /// Tear down everything; returns how many containers were destroyed.
    pub fn destroy_all(&self) -> usize { self.drain_all(false) }

    /// Destroy everything and refuse further creation with `Unavailable`.
    pub fn close(&self) -> usize { self.drain_all(true) }

    pub fn is_closed(&self) -> bool { self.state.read().closed }

    fn drain_all(&self, close: bool) -> usize {
        let drained: Vec<ContainerRef> = {
            let mut st = self.state.write();
            st.closed |= close;
            st.by_host.clear();
            st.refs.clear();
            let drained: Vec<ContainerRef> = st.containers.drain().map(|(_, c)| c).collect();
            st.destroyed += drained.len() as u64;
            drained
        };
        for c in &drained {
            c.teardown();
        }
        if !drained.is_empty() {
            info!(target: "hostgate::container", destroyed = drained.len(), "all containers destroyed");
        }
        drained.len()
    }

    pub fn len(&self) -> usize { self.state.read().containers.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn stats(&self) -> ContainerStats {
        let st = self.state.read();
        ContainerStats { total: st.created, active: st.containers.len(), destroyed: st.destroyed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{FacilityError, FacilityKind, IsolatedFacility};
    use crate::policy::SecurityPolicy;
    use std::any::Any;

    fn host(install: &str) -> Arc<HostIdentity> {
        Arc::new(HostIdentity::new("com.example.app", install, "Example", Some("ab".into())))
    }

    struct Broken;

    impl IsolatedFacility for Broken {
        fn kind(&self) -> FacilityKind { FacilityKind::Other("broken") }
        fn initialize(&self) -> Result<(), FacilityError> {
            Err(FacilityError::Initialization { kind: self.kind(), reason: "boom".into() })
        }
        fn apply_security_policy(&self, _policy: &SecurityPolicy) -> Result<(), FacilityError> { Ok(()) }
        fn cleanup(&self) {}
        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> { self }
    }

    struct BrokenProvider;

    impl FacilityProvider for BrokenProvider {
        fn provision(&self, id: &ContainerId, config: &ContainerConfig) -> Result<Vec<Arc<dyn IsolatedFacility>>, FacilityError> {
            let mut v = InProcessFacilities.provision(id, config)?;
            v.push(Arc::new(Broken));
            Ok(v)
        }
    }

    #[test]
    fn one_container_per_host() {
        let reg = ContainerRegistry::new(10);
        let h = host("a");
        let c1 = reg.create(h.clone(), &ContainerConfig::workload()).unwrap();
        let c2 = reg.create(h.clone(), &ContainerConfig::workload()).unwrap();
        assert_eq!(c1.id(), c2.id());
        assert_eq!(reg.stats(), ContainerStats { total: 1, active: 1, destroyed: 0 });
        assert_eq!(reg.get_for_host(h.host_id()).unwrap().id(), c1.id());
    }

    #[test]
    fn destroy_clears_both_indices() {
        let reg = ContainerRegistry::new(10);
        let h = host("a");
        let c = reg.create(h.clone(), &ContainerConfig::workload()).unwrap();
        assert!(reg.destroy(c.id()));
        assert!(!reg.destroy(c.id()));
        assert!(reg.get(c.id()).is_none());
        assert!(reg.get_for_host(h.host_id()).is_none());
        assert!(c.is_destroyed());

        let fresh = reg.create(h, &ContainerConfig::workload()).unwrap();
        assert_ne!(fresh.id(), c.id());
        assert_eq!(reg.stats(), ContainerStats { total: 2, active: 1, destroyed: 1 });
    }

    #[test]
    fn capacity_is_enforced() {
        let reg = ContainerRegistry::new(1);
        reg.create(host("a"), &ContainerConfig::development()).unwrap();
        let err = reg.create(host("b"), &ContainerConfig::development()).unwrap_err();
        assert!(matches!(err, GateError::Capacity { .. }));
        // the existing host still gets its container back
        assert!(reg.create(host("a"), &ContainerConfig::development()).is_ok());
    }

    #[test]
    fn failed_initialization_registers_nothing() {
        let reg = ContainerRegistry::with_provider(10, Arc::new(BrokenProvider));
        let h = host("a");
        let err = reg.create(h.clone(), &ContainerConfig::workload()).unwrap_err();
        assert!(matches!(err, GateError::ContainerInit { .. }));
        assert!(reg.get_for_host(h.host_id()).is_none());
        assert_eq!(reg.stats(), ContainerStats::default());
    }

    #[test]
    fn destroy_all_and_by_host() {
        let reg = ContainerRegistry::new(10);
        let a = host("a");
        reg.create(a.clone(), &ContainerConfig::workload()).unwrap();
        reg.create(host("b"), &ContainerConfig::workload()).unwrap();
        assert!(reg.destroy_for_host(a.host_id()));
        assert!(!reg.destroy_for_host(a.host_id()));
        assert_eq!(reg.destroy_all(), 1);
        assert!(reg.is_empty());
        assert_eq!(reg.stats().destroyed, 2);
    }

    #[test]
    fn release_reaps_only_the_last_reference() {
        let reg = ContainerRegistry::new(10);
        let h = host("a");
        let c = reg.acquire(h.clone(), &ContainerConfig::workload()).unwrap();
        let again = reg.acquire(h.clone(), &ContainerConfig::workload()).unwrap();
        assert_eq!(c.id(), again.id());
        assert_eq!(reg.session_refs(c.id()), 2);

        assert!(!reg.release(c.id()));
        assert!(!c.is_destroyed());
        assert!(reg.release(c.id()));
        assert!(c.is_destroyed());
        assert!(reg.get_for_host(h.host_id()).is_none());
        assert_eq!(reg.session_refs(c.id()), 0);
        // unknown ids are a no-op
        assert!(!reg.release(c.id()));
    }

    #[test]
    fn acquire_after_release_never_returns_a_destroyed_container() {
        let reg = ContainerRegistry::new(10);
        let h = host("a");
        let first = reg.acquire(h.clone(), &ContainerConfig::workload()).unwrap();
        assert!(reg.release(first.id()));
        let second = reg.acquire(h, &ContainerConfig::workload()).unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.is_active());
    }

    #[test]
    fn closed_registry_refuses_creation() {
        let reg = ContainerRegistry::new(10);
        let c = reg.acquire(host("a"), &ContainerConfig::workload()).unwrap();
        assert_eq!(reg.close(), 1);
        assert!(reg.is_closed());
        assert!(c.is_destroyed());
        let err = reg.acquire(host("a"), &ContainerConfig::workload()).unwrap_err();
        assert!(matches!(err, GateError::Unavailable { .. }));
        assert!(matches!(reg.create(host("b"), &ContainerConfig::workload()), Err(GateError::Unavailable { .. })));
        assert!(reg.is_empty());
    }
}

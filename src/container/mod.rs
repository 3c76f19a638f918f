//! Per-host isolated containers and the registry that owns them.

pub mod facilities;
mod registry;

pub use facilities::{
    ContainerEvent, FacilityError, FacilityKind, FacilityProvider, HookFn, HookRegistry, InProcessFacilities, IsolatedDataStore,
    IsolatedEventBus, IsolatedFacility,
};
pub use registry::{ContainerRegistry, ContainerStats};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::identity::HostIdentity;
use crate::policy::ContainerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// `ctr_<host id prefix>_<random suffix>`
    pub fn generate(host: &HostIdentity) -> Self {
        let host_id = host.host_id().as_str();
        let prefix = &host_id[..host_id.len().min(12)];
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("ctr_{}_{}", prefix, &suffix[..12]))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self { Self(raw.into()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Initializing,
    Active,
    Destroyed,
}

/// Summary of one dispatched container event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub subscribers: usize,
    pub hooks: usize,
}

pub type ContainerRef = Arc<Container>;

/// Isolated execution context for one host. Created and destroyed only through
/// [`ContainerRegistry`]; sessions hold a shared reference.
pub struct Container {
    id: ContainerId,
    host: Arc<HostIdentity>,
    config: ContainerConfig,
    created_at: DateTime<Utc>,
    state: RwLock<ContainerState>,
    facilities: Mutex<Vec<Arc<dyn IsolatedFacility>>>,
}

impl Container {
    pub(crate) fn new(host: Arc<HostIdentity>, config: ContainerConfig) -> Self {
        Self {
            id: ContainerId::generate(&host),
            host,
            config,
            created_at: Utc::now(),
            state: RwLock::new(ContainerState::Initializing),
            facilities: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &ContainerId { &self.id }
    pub fn host(&self) -> &Arc<HostIdentity> { &self.host }
    pub fn config(&self) -> &ContainerConfig { &self.config }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn state(&self) -> ContainerState { *self.state.read() }
    pub fn is_active(&self) -> bool { self.state() == ContainerState::Active }
    pub fn is_destroyed(&self) -> bool { self.state() == ContainerState::Destroyed }

    /// Provision, initialize and apply policy to every facility. On any failure the facilities
    /// brought up so far are cleaned up and the container is left `Destroyed`.
    pub(crate) fn initialize(&self, provider: &dyn FacilityProvider) -> Result<(), FacilityError> {
        let provisioned = match provider.provision(&self.id, &self.config) {
            Ok(p) => p,
            Err(e) => {
                *self.state.write() = ContainerState::Destroyed;
                return Err(e);
            }
        };
        let mut ready: Vec<Arc<dyn IsolatedFacility>> = Vec::with_capacity(provisioned.len());
        for facility in provisioned {
            let brought_up = facility.initialize().and_then(|_| facility.apply_security_policy(self.config.policy()));
            if let Err(e) = brought_up {
                warn!(target: "hostgate::container", container = %self.id, facility = %facility.kind(), error = %e, "facility failed; rolling back");
                facility.cleanup();
                for f in ready.iter().rev() {
                    f.cleanup();
                }
                *self.state.write() = ContainerState::Destroyed;
                return Err(e);
            }
            ready.push(facility);
        }
        *self.facilities.lock() = ready;
        *self.state.write() = ContainerState::Active;
        Ok(())
    }

    /// Mark destroyed and release all facilities. Returns false if already destroyed.
    pub(crate) fn teardown(&self) -> bool {
        {
            let mut state = self.state.write();
            if *state == ContainerState::Destroyed {
                return false;
            }
            *state = ContainerState::Destroyed;
        }
        let facilities = std::mem::take(&mut *self.facilities.lock());
        for f in facilities.iter().rev() {
            f.cleanup();
        }
        true
    }

    fn facility<T: Send + Sync + 'static>(&self, kind: FacilityKind) -> Option<Arc<T>> {
        let found = self.facilities.lock().iter().find(|f| f.kind() == kind).cloned()?;
        found.into_any().downcast::<T>().ok()
    }

    pub fn facility_kinds(&self) -> Vec<FacilityKind> { self.facilities.lock().iter().map(|f| f.kind()).collect() }

    pub fn data_store(&self) -> Option<Arc<IsolatedDataStore>> { self.facility(FacilityKind::DataStore) }
    pub fn event_bus(&self) -> Option<Arc<IsolatedEventBus>> { self.facility(FacilityKind::EventBus) }
    pub fn hooks(&self) -> Option<Arc<HookRegistry>> { self.facility(FacilityKind::Hooks) }

    /// Publish on the container bus and run registered hooks.
    pub fn emit(&self, topic: &str, payload: Value) -> Result<EmitReport, FacilityError> {
        let event = ContainerEvent::new(topic, payload);
        let subscribers = match self.event_bus() {
            Some(bus) => bus.publish(event.clone())?,
            None => 0,
        };
        let hooks = self.hooks().map(|h| h.dispatch(&event)).unwrap_or(0);
        Ok(EmitReport { subscribers, hooks })
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("host", &self.host.host_id())
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn host() -> Arc<HostIdentity> { Arc::new(HostIdentity::new("com.example.app", "i-1", "Example", Some("ab".into()))) }

    #[test]
    fn id_embeds_host_prefix() {
        let h = host();
        let a = ContainerId::generate(&h);
        let b = ContainerId::generate(&h);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(&format!("ctr_{}_", &h.host_id().as_str()[..12])));
    }

    #[test]
    fn initialize_then_emit_then_teardown() {
        let c = Container::new(host(), ContainerConfig::workload());
        assert_eq!(c.state(), ContainerState::Initializing);
        c.initialize(&InProcessFacilities).unwrap();
        assert!(c.is_active());

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        c.hooks().unwrap().register("count", Arc::new(move |_e: &ContainerEvent| { counter.fetch_add(1, Ordering::SeqCst); })).unwrap();
        let _rx = c.event_bus().unwrap().subscribe().unwrap();
        let report = c.emit("frame", json!({"n": 1})).unwrap();
        assert_eq!(report, EmitReport { subscribers: 1, hooks: 1 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        c.data_store().unwrap().put("k", json!(true)).unwrap();
        assert!(c.teardown());
        assert!(!c.teardown());
        assert!(c.is_destroyed());
        assert!(c.data_store().is_none());
    }
}

use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{FacilityError, FacilityKind, IsolatedFacility, Lifecycle};
use crate::container::ContainerId;
use crate::policy::{capability, SecurityPolicy};

struct Entry {
    value: Value,
    size: u64,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, Entry>,
    used: u64,
}

/// Per-container JSON key/value store bounded by the container memory ceiling.
pub struct IsolatedDataStore {
    container_id: ContainerId,
    ceiling: u64,
    lifecycle: Lifecycle,
    inner: RwLock<Inner>,
}

impl IsolatedDataStore {
    pub fn new(container_id: ContainerId, ceiling_bytes: u64) -> Self {
        Self { container_id, ceiling: ceiling_bytes, lifecycle: Lifecycle::default(), inner: RwLock::new(Inner::default()) }
    }

    fn entry_size(key: &str, value: &Value) -> u64 {
        let encoded = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
        (key.len() + encoded) as u64
    }

    pub fn put(&self, key: &str, value: Value) -> Result<(), FacilityError> {
        self.lifecycle.check(FacilityKind::DataStore, capability::DATA_WRITE)?;
        let size = Self::entry_size(key, &value);
        let mut inner = self.inner.write();
        let previous = inner.map.get(key).map(|e| e.size).unwrap_or(0);
        let projected = inner.used - previous + size;
        if projected > self.ceiling {
            return Err(FacilityError::CapacityExceeded {
                kind: FacilityKind::DataStore,
                reason: format!("{} bytes over ceiling {}", projected, self.ceiling),
            });
        }
        inner.used = projected;
        inner.map.insert(key.to_string(), Entry { value, size });
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, FacilityError> {
        self.lifecycle.check(FacilityKind::DataStore, capability::DATA_READ)?;
        Ok(self.inner.read().map.get(key).map(|e| e.value.clone()))
    }

    pub fn remove(&self, key: &str) -> Result<bool, FacilityError> {
        self.lifecycle.check(FacilityKind::DataStore, capability::DATA_WRITE)?;
        let mut inner = self.inner.write();
        match inner.map.remove(key) {
            Some(e) => {
                inner.used -= e.size;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn keys(&self) -> Result<Vec<String>, FacilityError> {
        self.lifecycle.check(FacilityKind::DataStore, capability::DATA_READ)?;
        let mut keys: Vec<String> = self.inner.read().map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn len(&self) -> usize { self.inner.read().map.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn used_bytes(&self) -> u64 { self.inner.read().used }
    pub fn is_active(&self) -> bool { self.lifecycle.is_active() }
}

impl IsolatedFacility for IsolatedDataStore {
    fn kind(&self) -> FacilityKind { FacilityKind::DataStore }

    fn initialize(&self) -> Result<(), FacilityError> {
        if self.ceiling == 0 {
            return Err(FacilityError::Initialization { kind: FacilityKind::DataStore, reason: "memory ceiling is zero".into() });
        }
        self.lifecycle.activate();
        Ok(())
    }

    fn apply_security_policy(&self, policy: &SecurityPolicy) -> Result<(), FacilityError> {
        self.lifecycle.set_policy(FacilityKind::DataStore, policy)
    }

    fn cleanup(&self) {
        if self.lifecycle.deactivate() {
            let mut inner = self.inner.write();
            let dropped = inner.map.len();
            inner.map.clear();
            inner.used = 0;
            debug!(target: "hostgate::container", container = %self.container_id, dropped, "data store cleared");
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> { self }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn live(ceiling: u64, policy: &SecurityPolicy) -> IsolatedDataStore {
        let ds = IsolatedDataStore::new(ContainerId::from_raw("ctr_ds"), ceiling);
        ds.initialize().unwrap();
        ds.apply_security_policy(policy).unwrap();
        ds
    }

    #[test]
    fn put_get_remove_tracks_usage() {
        let ds = live(1024, &SecurityPolicy::workload());
        ds.put("a", json!({"x": 1})).unwrap();
        assert_eq!(ds.get("a").unwrap(), Some(json!({"x": 1})));
        let used = ds.used_bytes();
        assert!(used > 0);
        // overwrite replaces the previous entry's footprint
        ds.put("a", json!(1)).unwrap();
        assert!(ds.used_bytes() < used);
        assert!(ds.remove("a").unwrap());
        assert!(!ds.remove("a").unwrap());
        assert_eq!(ds.used_bytes(), 0);
    }

    #[test]
    fn ceiling_is_enforced() {
        let ds = live(16, &SecurityPolicy::workload());
        ds.put("k", json!("short")).unwrap();
        let err = ds.put("k2", json!("this value is definitely too long")).unwrap_err();
        assert!(matches!(err, FacilityError::CapacityExceeded { .. }));
        assert_eq!(ds.len(), 1);
    }

    #[test]
    fn policy_and_cleanup_gate_access() {
        let read_only = SecurityPolicy::builder().allow(capability::DATA_READ).build().unwrap();
        let ds = live(1024, &read_only);
        assert!(matches!(ds.put("a", json!(1)), Err(FacilityError::Denied { .. })));
        assert_eq!(ds.get("a").unwrap(), None);
        ds.cleanup();
        ds.cleanup();
        assert!(matches!(ds.get("a"), Err(FacilityError::Inactive { .. })));
    }
}

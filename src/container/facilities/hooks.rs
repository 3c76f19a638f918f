use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ContainerEvent, FacilityError, FacilityKind, IsolatedFacility, Lifecycle};
use crate::container::ContainerId;
use crate::policy::{capability, SecurityPolicy};

pub type HookFn = Arc<dyn Fn(&ContainerEvent) + Send + Sync>;

/// Named callbacks invoked on container events, bounded by `max_hooks`.
pub struct HookRegistry {
    container_id: ContainerId,
    max_hooks: usize,
    lifecycle: Lifecycle,
    hooks: RwLock<BTreeMap<String, HookFn>>,
}

impl HookRegistry {
    pub fn new(container_id: ContainerId, max_hooks: usize) -> Self {
        Self { container_id, max_hooks, lifecycle: Lifecycle::default(), hooks: RwLock::new(BTreeMap::new()) }
    }

    /// Register or replace a hook by name.
    pub fn register(&self, name: &str, hook: HookFn) -> Result<(), FacilityError> {
        self.lifecycle.check(FacilityKind::Hooks, capability::HOOKS_REGISTER)?;
        let mut hooks = self.hooks.write();
        if !hooks.contains_key(name) && hooks.len() >= self.max_hooks {
            warn!(target: "hostgate::container", container = %self.container_id, hook = name, max = self.max_hooks, "hook limit reached");
            return Err(FacilityError::CapacityExceeded { kind: FacilityKind::Hooks, reason: format!("max_hooks={}", self.max_hooks) });
        }
        hooks.insert(name.to_string(), hook);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool { self.hooks.write().remove(name).is_some() }

    pub fn is_registered(&self, name: &str) -> bool { self.hooks.read().contains_key(name) }

    pub fn names(&self) -> Vec<String> { self.hooks.read().keys().cloned().collect() }

    pub fn len(&self) -> usize { self.hooks.read().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Invoke every registered hook with the event; returns how many ran.
    /// Callbacks run outside the registry lock so they may register or unregister hooks.
    pub fn dispatch(&self, event: &ContainerEvent) -> usize {
        if !self.lifecycle.is_active() {
            return 0;
        }
        let snapshot: Vec<HookFn> = self.hooks.read().values().cloned().collect();
        for hook in &snapshot {
            hook(event);
        }
        snapshot.len()
    }
}

impl IsolatedFacility for HookRegistry {
    fn kind(&self) -> FacilityKind { FacilityKind::Hooks }

    fn initialize(&self) -> Result<(), FacilityError> {
        if self.max_hooks == 0 {
            return Err(FacilityError::Initialization { kind: FacilityKind::Hooks, reason: "max_hooks is zero".into() });
        }
        self.lifecycle.activate();
        Ok(())
    }

    fn apply_security_policy(&self, policy: &SecurityPolicy) -> Result<(), FacilityError> {
        self.lifecycle.set_policy(FacilityKind::Hooks, policy)
    }

    fn cleanup(&self) {
        if self.lifecycle.deactivate() {
            let mut hooks = self.hooks.write();
            let dropped = hooks.len();
            hooks.clear();
            debug!(target: "hostgate::container", container = %self.container_id, dropped, "hooks cleared");
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> { self }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn live(max: usize, policy: &SecurityPolicy) -> HookRegistry {
        let h = HookRegistry::new(ContainerId::from_raw("ctr_hooks"), max);
        h.initialize().unwrap();
        h.apply_security_policy(policy).unwrap();
        h
    }

    #[test]
    fn register_dispatch_and_limit() {
        let h = live(2, &SecurityPolicy::workload());
        let hits = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b"] {
            let hits = hits.clone();
            h.register(name, Arc::new(move |_e: &ContainerEvent| { hits.fetch_add(1, Ordering::SeqCst); })).unwrap();
        }
        // replacing an existing name does not count against the limit
        h.register("a", Arc::new(|_e: &ContainerEvent| {})).unwrap();
        assert!(matches!(h.register("c", Arc::new(|_e: &ContainerEvent| {})), Err(FacilityError::CapacityExceeded { .. })));

        assert_eq!(h.dispatch(&ContainerEvent::new("tick", json!(null))), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(h.unregister("b"));
        assert_eq!(h.names(), vec!["a".to_string()]);
    }

    #[test]
    fn hardened_policy_denies_registration() {
        let h = live(4, &SecurityPolicy::hardened());
        assert!(matches!(h.register("x", Arc::new(|_e: &ContainerEvent| {})), Err(FacilityError::Denied { .. })));
        h.cleanup();
        assert_eq!(h.dispatch(&ContainerEvent::new("tick", json!(null))), 0);
    }
}

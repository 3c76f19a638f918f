use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::{FacilityError, FacilityKind, IsolatedFacility, Lifecycle};
use crate::container::ContainerId;
use crate::policy::{capability, SecurityPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub topic: String,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

impl ContainerEvent {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self { topic: topic.into(), payload, at: Utc::now() }
    }
}

/// Broadcast channel scoped to one container. Slow subscribers lag rather than block publishers;
/// the channel is closed on cleanup.
pub struct IsolatedEventBus {
    container_id: ContainerId,
    depth: usize,
    lifecycle: Lifecycle,
    sender: Mutex<Option<broadcast::Sender<ContainerEvent>>>,
}

impl IsolatedEventBus {
    pub fn new(container_id: ContainerId, depth: usize) -> Self {
        Self { container_id, depth: depth.max(1), lifecycle: Lifecycle::default(), sender: Mutex::new(None) }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: ContainerEvent) -> Result<usize, FacilityError> {
        self.lifecycle.check(FacilityKind::EventBus, capability::EVENTS_PUBLISH)?;
        let guard = self.sender.lock();
        let tx = guard.as_ref().ok_or(FacilityError::Inactive { kind: FacilityKind::EventBus })?;
        // no subscribers is not an error
        Ok(tx.send(event).unwrap_or(0))
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<ContainerEvent>, FacilityError> {
        self.lifecycle.check(FacilityKind::EventBus, capability::EVENTS_SUBSCRIBE)?;
        let guard = self.sender.lock();
        let tx = guard.as_ref().ok_or(FacilityError::Inactive { kind: FacilityKind::EventBus })?;
        Ok(tx.subscribe())
    }

    pub fn queue_depth(&self) -> usize { self.depth }

    pub fn subscriber_count(&self) -> usize {
        self.sender.lock().as_ref().map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}

impl IsolatedFacility for IsolatedEventBus {
    fn kind(&self) -> FacilityKind { FacilityKind::EventBus }

    fn initialize(&self) -> Result<(), FacilityError> {
        let (tx, _rx) = broadcast::channel(self.depth);
        *self.sender.lock() = Some(tx);
        self.lifecycle.activate();
        Ok(())
    }

    fn apply_security_policy(&self, policy: &SecurityPolicy) -> Result<(), FacilityError> {
        self.lifecycle.set_policy(FacilityKind::EventBus, policy)
    }

    fn cleanup(&self) {
        if self.lifecycle.deactivate() {
            let dropped = self.sender.lock().take();
            debug!(target: "hostgate::container", container = %self.container_id, had_sender = dropped.is_some(), "event bus closed");
        }
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> { self }
}

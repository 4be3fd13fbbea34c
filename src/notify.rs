use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::availability::{Owner, ResourceId};
use crate::model::{Ms, TimeSlot};

const CHANNEL_CAPACITY: usize = 256;

/// A slot was disabled over segments other owners held. `previous_owners`
/// never contains `Owner::none()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTakenOver {
    pub event_id: Ulid,
    pub resource_id: ResourceId,
    pub previous_owners: HashSet<Owner>,
    pub slot: TimeSlot,
    pub occurred_at: Ms,
}

impl ResourceTakenOver {
    pub fn new(resource_id: ResourceId, previous_owners: HashSet<Owner>, slot: TimeSlot, occurred_at: Ms) -> Self {
        Self {
            event_id: Ulid::new(),
            resource_id,
            previous_owners,
            slot,
            occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainEvent {
    ResourceTakenOver(ResourceTakenOver),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ResourceTakenOver,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::ResourceTakenOver(_) => EventKind::ResourceTakenOver,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        match self {
            DomainEvent::ResourceTakenOver(e) => e.resource_id,
        }
    }
}

pub type Handler = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Explicit handler table, fixed once built.
///
/// Handlers run synchronously on the publishing thread, in registration order.
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl EventBus {
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    pub fn publish(&self, event: &DomainEvent) {
        let Some(handlers) = self.handlers.get(&event.kind()) else {
            tracing::debug!(kind = ?event.kind(), "no handlers registered");
            return;
        };
        for handler in handlers {
            handler(event);
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

#[derive(Default)]
pub struct EventBusBuilder {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl EventBusBuilder {
    pub fn on(mut self, kind: EventKind, handler: impl Fn(&DomainEvent) + Send + Sync + 'static) -> Self {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
        self
    }

    pub fn build(self) -> EventBus {
        EventBus {
            handlers: self.handlers,
        }
    }
}

/// Broadcast hub for domain events, one channel per resource.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<ResourceId, broadcast::Sender<DomainEvent>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: ResourceId) -> broadcast::Receiver<DomainEvent> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, event: &DomainEvent) {
        if let Some(sender) = self.channels.get(&event.resource_id()) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn remove(&self, resource_id: &ResourceId) {
        self.channels.remove(resource_id);
    }

    /// Bus handler that rebroadcasts every event it sees through this hub.
    pub fn forwarder(self: &Arc<Self>) -> impl Fn(&DomainEvent) + Send + Sync + 'static {
        let hub = Arc::clone(self);
        move |event| hub.send(event)
    }
}

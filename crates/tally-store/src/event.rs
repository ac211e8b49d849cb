use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::trace;

use tally_types::{ObjectKey, ResourceKind};

/// Notification that an object changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceEvent {
    /// The object was created or updated (including deletion requests).
    Applied { kind: ResourceKind, key: ObjectKey },
    /// The object is gone from the store.
    Deleted { kind: ResourceKind, key: ObjectKey },
}

impl ResourceEvent {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Applied { kind, .. } | Self::Deleted { kind, .. } => *kind,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Applied { key, .. } | Self::Deleted { key, .. } => key,
        }
    }
}

/// Per-kind broadcast fan-out shared by the store backends.
///
/// Publishing with no subscribers is not an error; slow subscribers may lag
/// and miss events, which the periodic requeue makes up for.
#[derive(Debug)]
pub struct EventHub {
    senders: HashMap<ResourceKind, broadcast::Sender<ResourceEvent>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let senders = ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, broadcast::channel(capacity).0))
            .collect();
        Self { senders }
    }

    pub fn subscribe(&self, kind: ResourceKind) -> broadcast::Receiver<ResourceEvent> {
        match self.senders.get(&kind) {
            Some(tx) => tx.subscribe(),
            // Every kind is registered in `new`.
            None => broadcast::channel(1).1,
        }
    }

    pub fn publish(&self, event: ResourceEvent) {
        if let Some(tx) = self.senders.get(&event.kind()) {
            let delivered = tx.send(event).unwrap_or(0);
            trace!(delivered, "resource event published");
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

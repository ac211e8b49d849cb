use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::diff::PeerDiff;
use crate::error::RingResult;
use crate::membership::{decode_endpoints, MembershipEvent};
use crate::ring::ShardRing;

/// Applies membership events to a [`ShardRing`].
///
/// The watcher holds no lock of its own; the ring's lock serializes its
/// writes against concurrent ownership lookups.
#[derive(Clone, Debug)]
pub struct PeerWatcher {
    ring: Arc<ShardRing>,
}

impl PeerWatcher {
    pub fn new(ring: Arc<ShardRing>) -> Self {
        Self { ring }
    }

    /// Decode one event, diff it, and apply the result to the ring.
    ///
    /// An undecodable current snapshot is an error and leaves the ring as it
    /// was: stale membership is safer than an empty ring. When the event has
    /// no usable previous snapshot but the ring already has members (a
    /// re-list after a watch restart), the ring's own membership stands in
    /// for it so that departed peers are still removed.
    pub fn apply(&self, event: &MembershipEvent) -> RingResult<PeerDiff> {
        let current = decode_endpoints(event.current())?;

        let previous = match event.previous().map(decode_endpoints).transpose() {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "previous endpoints undecodable; diffing against ring");
                None
            }
        };
        let previous = match previous {
            Some(previous) => Some(previous),
            None if self.ring.member_count() > 0 => Some(self.ring.members()),
            None => None,
        };

        let diff = PeerDiff::compute(&current, previous.as_ref());
        let changed = self.ring.apply_diff(&diff);

        if changed > 0 {
            info!(
                added = diff.added.len(),
                removed = diff.removed.len(),
                members = self.ring.member_count(),
                "synchronized peer ring"
            );
        } else {
            debug!(members = self.ring.member_count(), "membership unchanged");
        }
        Ok(diff)
    }

    /// Consume events until the channel closes or shutdown is signalled.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<MembershipEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.wait_for(|stop| *stop) => None,
            };
            let Some(event) = event else {
                debug!("peer watcher stopped");
                return;
            };
            if let Err(e) = self.apply(&event) {
                warn!(error = %e, "dropping membership event");
            }
        }
    }
}

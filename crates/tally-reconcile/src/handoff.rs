use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tally_store::{LabelSelector, ResourceStore, StoreError, StoreResult};
use tally_types::{PeerAddress, Resource, ResourceKind, SHARD_OWNER_LABEL};

/// Tally of one handoff pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandoffReport {
    /// Reports whose owner label was cleared.
    pub released: usize,
    /// Lists or updates that failed.
    pub failed: usize,
    /// The grace period ran out before the pass finished.
    pub timed_out: bool,
}

/// Counters shared with a pass that may be cut short.
#[derive(Debug, Default)]
struct Progress {
    released: AtomicUsize,
    failed: AtomicUsize,
}

impl Progress {
    fn released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self, timed_out: bool) -> HandoffReport {
        HandoffReport {
            released: self.released.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out,
        }
    }
}

/// Clears this replica's owner label from every report it claimed.
///
/// Best effort. The ring is not touched; survivors learn about the exit
/// from membership, and the cleared label only shortens the time a report
/// appears owned by a dead replica.
pub struct ShutdownHandoff {
    store: Arc<dyn ResourceStore>,
    self_address: PeerAddress,
    kinds: Vec<ResourceKind>,
}

impl ShutdownHandoff {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        self_address: PeerAddress,
        kinds: Vec<ResourceKind>,
    ) -> Self {
        Self {
            store,
            self_address,
            kinds,
        }
    }

    /// Run the pass to completion. Never fails.
    pub async fn run(&self) -> HandoffReport {
        let progress = Progress::default();
        self.pass(&progress).await;
        let report = progress.report(false);
        info!(
            released = report.released,
            failed = report.failed,
            "shutdown handoff finished"
        );
        report
    }

    /// Run the pass, giving up once `grace` has elapsed.
    ///
    /// A pass cut short still reports what it released before the deadline.
    pub async fn run_within(&self, grace: Duration) -> HandoffReport {
        let progress = Progress::default();
        let finished = tokio::time::timeout(grace, self.pass(&progress)).await.is_ok();
        let report = progress.report(!finished);
        if finished {
            info!(
                released = report.released,
                failed = report.failed,
                "shutdown handoff finished"
            );
        } else {
            warn!(
                grace_secs = grace.as_secs_f64(),
                released = report.released,
                failed = report.failed,
                "shutdown handoff timed out"
            );
        }
        report
    }

    async fn pass(&self, progress: &Progress) {
        let selector = LabelSelector::eq(SHARD_OWNER_LABEL, self.self_address.as_str());

        for &kind in &self.kinds {
            let owned = match self.store.list(kind, &selector).await {
                Ok(owned) => owned,
                Err(e) => {
                    warn!(%kind, error = %e, "handoff list failed");
                    progress.failed();
                    continue;
                }
            };
            debug!(%kind, count = owned.len(), "releasing owned reports");

            for resource in owned {
                let key = resource.key();
                match self.release(resource).await {
                    Ok(true) => progress.released(),
                    Ok(false) => debug!(%kind, %key, "owner label already gone"),
                    Err(e) => {
                        warn!(%kind, %key, error = %e, "handoff update failed");
                        progress.failed();
                    }
                }
            }
        }
    }

    /// Clear the label on one report, re-reading it once on conflict.
    ///
    /// Returns `false` when the report no longer names this replica.
    async fn release(&self, resource: Resource) -> StoreResult<bool> {
        let kind = resource.kind();
        let key = resource.key();
        match self.store.update(self.unlabelled(resource)).await {
            Ok(_) => Ok(true),
            Err(StoreError::Conflict { .. }) => {
                let Some(fresh) = self.store.get(kind, &key).await? else {
                    return Ok(false);
                };
                if fresh.metadata.label(SHARD_OWNER_LABEL) != Some(self.self_address.as_str()) {
                    return Ok(false);
                }
                self.store.update(self.unlabelled(fresh)).await?;
                Ok(true)
            }
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn unlabelled(&self, mut resource: Resource) -> Resource {
        resource.metadata.labels.remove(SHARD_OWNER_LABEL);
        resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use tally_store::{InMemoryResourceStore, ResourceEvent};
    use tally_types::{CisKubeBenchReport, ConfigAuditReport, ObjectKey, ReportBody};

    const ME: &str = "10.0.0.1";

    fn owned_by(mut resource: Resource, owner: &str) -> Resource {
        resource
            .metadata
            .labels
            .insert(SHARD_OWNER_LABEL.into(), owner.into());
        resource
    }

    fn node(name: &str) -> Resource {
        Resource::new(
            &ObjectKey::cluster(name),
            ReportBody::CisKubeBench(CisKubeBenchReport::default()),
        )
    }

    fn audit(name: &str) -> Resource {
        Resource::new(
            &ObjectKey::namespaced("default", name),
            ReportBody::ConfigAudit(ConfigAuditReport::default()),
        )
    }

    fn handoff(store: Arc<dyn ResourceStore>) -> ShutdownHandoff {
        ShutdownHandoff::new(store, PeerAddress::from(ME), ResourceKind::ALL.to_vec())
    }

    #[tokio::test]
    async fn clears_only_own_labels() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.insert(owned_by(node("node-a"), ME));
        store.insert(owned_by(node("node-b"), "10.0.0.2"));
        store.insert(owned_by(audit("deploy-1"), ME));
        store.insert(audit("deploy-2"));

        let report = handoff(store.clone()).run().await;
        assert_eq!(
            report,
            HandoffReport {
                released: 2,
                failed: 0,
                timed_out: false
            }
        );

        let a = store
            .get(ResourceKind::CisKubeBenchReport, &ObjectKey::cluster("node-a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.metadata.label(SHARD_OWNER_LABEL), None);

        let b = store
            .get(ResourceKind::CisKubeBenchReport, &ObjectKey::cluster("node-b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.metadata.label(SHARD_OWNER_LABEL), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn list_failure_is_counted_and_other_kinds_continue() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.insert(owned_by(node("node-a"), ME));
        store.insert(owned_by(audit("deploy-1"), ME));
        store.fail_next_lists(1);

        let report = handoff(store.clone()).run().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.released, 1);
    }

    #[tokio::test]
    async fn update_failure_is_not_fatal() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.insert(owned_by(node("node-a"), ME));
        store.insert(owned_by(node("node-b"), ME));
        store.fail_next_updates(1);

        let report = handoff(store.clone()).run().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.released, 1);
    }

    #[tokio::test]
    async fn nothing_owned_is_a_no_op() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.insert(node("node-a"));
        let report = handoff(store.clone()).run().await;
        assert_eq!(report, HandoffReport::default());
        assert_eq!(store.update_count(), 0);
    }

    /// Store whose lists never return.
    struct StalledStore;

    #[async_trait]
    impl ResourceStore for StalledStore {
        async fn get(&self, _: ResourceKind, _: &ObjectKey) -> StoreResult<Option<Resource>> {
            Ok(None)
        }

        async fn list(&self, _: ResourceKind, _: &LabelSelector) -> StoreResult<Vec<Resource>> {
            std::future::pending().await
        }

        async fn create(&self, resource: Resource) -> StoreResult<Resource> {
            Ok(resource)
        }

        async fn update(&self, resource: Resource) -> StoreResult<Resource> {
            Ok(resource)
        }

        async fn delete(&self, _: ResourceKind, _: &ObjectKey) -> StoreResult<bool> {
            Ok(false)
        }

        fn watch(&self, _: ResourceKind) -> broadcast::Receiver<ResourceEvent> {
            broadcast::channel(1).1
        }
    }

    #[tokio::test]
    async fn grace_period_bounds_the_pass() {
        let report = handoff(Arc::new(StalledStore))
            .run_within(Duration::from_millis(50))
            .await;
        assert!(report.timed_out);
        assert_eq!(report.released, 0);
    }

    /// Serves cluster-scoped lists, then never answers for namespaced kinds.
    struct StallsAfterClusterKinds {
        inner: InMemoryResourceStore,
    }

    #[async_trait]
    impl ResourceStore for StallsAfterClusterKinds {
        async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<Option<Resource>> {
            self.inner.get(kind, key).await
        }

        async fn list(&self, kind: ResourceKind, selector: &LabelSelector) -> StoreResult<Vec<Resource>> {
            if kind.is_namespaced() {
                std::future::pending().await
            } else {
                self.inner.list(kind, selector).await
            }
        }

        async fn create(&self, resource: Resource) -> StoreResult<Resource> {
            self.inner.create(resource).await
        }

        async fn update(&self, resource: Resource) -> StoreResult<Resource> {
            self.inner.update(resource).await
        }

        async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<bool> {
            self.inner.delete(kind, key).await
        }

        fn watch(&self, kind: ResourceKind) -> broadcast::Receiver<ResourceEvent> {
            self.inner.watch(kind)
        }
    }

    #[tokio::test]
    async fn timed_out_pass_reports_what_it_released() {
        let inner = InMemoryResourceStore::new();
        inner.insert(owned_by(node("node-a"), ME));
        inner.insert(owned_by(node("node-b"), ME));
        inner.insert(owned_by(audit("deploy-1"), ME));
        inner.fail_next_updates(1);

        let report = handoff(Arc::new(StallsAfterClusterKinds { inner }))
            .run_within(Duration::from_millis(100))
            .await;
        assert_eq!(
            report,
            HandoffReport {
                released: 1,
                failed: 1,
                timed_out: true
            }
        );
    }
}

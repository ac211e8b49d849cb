use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use tally_store::LabelSelector;
use tally_types::ObjectKey;

use crate::error::ReconcileResult;
use crate::queue::WorkQueue;
use crate::reconciler::OwnershipReconciler;

/// Drives one kind's reconciler from store events, ring changes, and a
/// periodic resync.
pub struct Controller {
    reconciler: Arc<OwnershipReconciler>,
    queue: Arc<WorkQueue<ObjectKey>>,
}

impl Controller {
    pub fn new(reconciler: Arc<OwnershipReconciler>) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
        }
    }

    pub fn reconciler(&self) -> &Arc<OwnershipReconciler> {
        &self.reconciler
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    /// Queue every report of this kind. Returns how many were listed.
    pub async fn enqueue_all(&self) -> ReconcileResult<usize> {
        let kind = self.reconciler.kind();
        let reports = self
            .reconciler
            .store()
            .list(kind, &LabelSelector::everything())
            .await?;
        let count = reports.len();
        for report in reports {
            self.queue.add(report.key());
        }
        debug!(%kind, count, "queued all reports");
        Ok(count)
    }

    /// Run until `shutdown` flips to `true`, then stop the workers.
    ///
    /// Queued keys are dropped; only passes already in flight finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> ReconcileResult<()> {
        let kind = self.reconciler.kind();
        let workers = self.reconciler.config().workers.max(1);

        let mut events = self.reconciler.store().watch(kind);
        let mut ring = self.reconciler.ring().subscribe();
        ring.borrow_and_update();
        // The first tick fires at once and doubles as the initial list.
        let mut resync = tokio::time::interval(self.reconciler.config().requeue_interval());

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            tasks.spawn(work(id, queue, reconciler));
        }
        info!(%kind, workers, "controller started");

        let mut watching = true;
        let mut ring_open = true;
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = resync.tick() => {
                    if let Err(e) = self.enqueue_all().await {
                        warn!(%kind, error = %e, "resync list failed");
                    }
                }
                changed = ring.changed(), if ring_open => match changed {
                    Ok(()) => {
                        let members = ring.borrow_and_update().members;
                        info!(%kind, members, "ring changed; requeueing all reports");
                        if let Err(e) = self.enqueue_all().await {
                            warn!(%kind, error = %e, "requeue after ring change failed");
                        }
                    }
                    Err(_) => ring_open = false,
                },
                event = events.recv(), if watching => match event {
                    Ok(event) => self.queue.add(event.key().clone()),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(%kind, missed, "store events lagged; requeueing all reports");
                        if let Err(e) = self.enqueue_all().await {
                            warn!(%kind, error = %e, "requeue after lag failed");
                        }
                    }
                    Err(RecvError::Closed) => {
                        warn!(%kind, "store event stream closed; relying on resync");
                        watching = false;
                    }
                },
            }
        }

        let dropped = self.queue.shut_down();
        debug!(%kind, dropped, "dropped queued keys");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(%kind, error = %e, "reconcile worker aborted");
            }
        }
        info!(%kind, "controller stopped");
        Ok(())
    }
}

/// Resolves once shutdown is requested or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn work(id: usize, queue: Arc<WorkQueue<ObjectKey>>, reconciler: Arc<OwnershipReconciler>) {
    while let Some(key) = queue.get().await {
        let next = reconciler.reconcile_and_schedule(&key).await;
        queue.done(&key);
        match next {
            Some(delay) => queue.add_after(key, delay),
            None => queue.forget(&key),
        }
    }
    debug!(worker = id, kind = %reconciler.kind(), "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::ReconcileConfig;
    use crate::kinds::config_audit::SUMMARY_FAMILY;
    use crate::kinds::exporter_for;
    use tally_metrics::{InMemoryMetricRegistry, MetricRegistry};
    use tally_ring::{RingConfig, ShardRing};
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use tally_store::{InMemoryResourceStore, ResourceEvent, ResourceStore, StoreResult};
    use tally_types::{ConfigAuditReport, PeerAddress, ReportBody, Resource, ResourceKind};

    const ME: &str = "10.0.0.1";

    fn audit(ns: &str, name: &str) -> Resource {
        Resource::new(
            &ObjectKey::namespaced(ns, name),
            ReportBody::ConfigAudit(ConfigAuditReport::default()),
        )
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn publishes_listed_and_new_reports_then_stops() {
        let store = Arc::new(InMemoryResourceStore::new());
        let registry = Arc::new(InMemoryMetricRegistry::new());
        let ring = Arc::new(ShardRing::new(PeerAddress::from(ME), RingConfig::default()).unwrap());
        ring.add_members(&[PeerAddress::from(ME)]);
        store.insert(audit("team-a", "deploy-1"));

        let reconciler = OwnershipReconciler::new(
            store.clone(),
            Arc::clone(&ring),
            registry.clone(),
            exporter_for(ResourceKind::ConfigAuditReport, "").unwrap(),
            ReconcileConfig {
                workers: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let controller = Arc::new(Controller::new(Arc::new(reconciler)));

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run(stop_rx).await })
        };

        eventually("initial publish", || registry.series_count(SUMMARY_FAMILY) == 3).await;

        store.insert(audit("team-b", "deploy-2"));
        eventually("event-driven publish", || registry.series_count(SUMMARY_FAMILY) == 6).await;

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(controller.queue().is_shutting_down());
    }

    #[tokio::test]
    async fn ring_change_moves_series_away() {
        let store = Arc::new(InMemoryResourceStore::new());
        let registry = Arc::new(InMemoryMetricRegistry::new());
        let ring = Arc::new(ShardRing::new(PeerAddress::from(ME), RingConfig::default()).unwrap());
        ring.add_members(&[PeerAddress::from(ME)]);
        for i in 0..20 {
            store.insert(audit("ns", &format!("deploy-{i}")));
        }

        let reconciler = OwnershipReconciler::new(
            store.clone(),
            Arc::clone(&ring),
            registry.clone(),
            exporter_for(ResourceKind::ConfigAuditReport, "").unwrap(),
            ReconcileConfig::default(),
        )
        .unwrap();
        let controller = Arc::new(Controller::new(Arc::new(reconciler)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run(stop_rx).await })
        };

        eventually("all published", || registry.series_count(SUMMARY_FAMILY) == 60).await;

        ring.add_members(&[PeerAddress::from("10.0.0.2")]);
        let keys: Vec<ObjectKey> = store
            .list(ResourceKind::ConfigAuditReport, &LabelSelector::everything())
            .await
            .unwrap()
            .iter()
            .map(|r| r.key())
            .collect();
        let mine = keys
            .iter()
            .filter(|k| ring.should_own(&k.to_string()))
            .count();
        assert!(mine < 20, "second member should take some reports");

        eventually("series moved", || {
            registry.series_count(SUMMARY_FAMILY) == mine * 3
        })
        .await;

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn deleted_report_is_retracted_and_not_rescheduled() {
        let store = Arc::new(InMemoryResourceStore::new());
        let registry = Arc::new(InMemoryMetricRegistry::new());
        let ring = Arc::new(ShardRing::new(PeerAddress::from(ME), RingConfig::default()).unwrap());
        ring.add_members(&[PeerAddress::from(ME)]);
        store.insert(audit("team-a", "deploy-1"));

        let reconciler = OwnershipReconciler::new(
            store.clone(),
            Arc::clone(&ring),
            registry.clone(),
            exporter_for(ResourceKind::ConfigAuditReport, "").unwrap(),
            ReconcileConfig::default(),
        )
        .unwrap();
        let controller = Arc::new(Controller::new(Arc::new(reconciler)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run(stop_rx).await })
        };

        eventually("publish", || {
            registry.series_count(SUMMARY_FAMILY) == 3 && controller.queue().scheduled() == 1
        })
        .await;

        store.remove(
            ResourceKind::ConfigAuditReport,
            &ObjectKey::namespaced("team-a", "deploy-1"),
        );
        eventually("retraction without a requeue", || {
            registry.series_count(SUMMARY_FAMILY) == 0 && controller.queue().scheduled() == 0
        })
        .await;

        stop_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    /// Store whose gets take a while.
    struct SlowStore {
        inner: InMemoryResourceStore,
        delay: Duration,
    }

    #[async_trait]
    impl ResourceStore for SlowStore {
        async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> StoreResult<Option<Resource>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(kind, key).await
        }

        async fn list(&self, kind: ResourceKind, selector: &LabelSelector) -> StoreResult<Vec<Resource>> {
            self.inner.list(kind, selector).await
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
    async fn stop_does_not_wait_for_queued_keys() {
        let slow = SlowStore {
            inner: InMemoryResourceStore::new(),
            delay: Duration::from_millis(200),
        };
        for i in 0..50 {
            slow.inner.insert(audit("ns", &format!("deploy-{i}")));
        }
        let store = Arc::new(slow);
        let registry = Arc::new(InMemoryMetricRegistry::new());
        let ring = Arc::new(ShardRing::new(PeerAddress::from(ME), RingConfig::default()).unwrap());
        ring.add_members(&[PeerAddress::from(ME)]);

        let reconciler = OwnershipReconciler::new(
            store,
            Arc::clone(&ring),
            registry.clone(),
            exporter_for(ResourceKind::ConfigAuditReport, "").unwrap(),
            ReconcileConfig {
                workers: 1,
                ..Default::default()
            },
        )
        .unwrap();
        let controller = Arc::new(Controller::new(Arc::new(reconciler)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run(stop_rx).await })
        };

        eventually("keys queued", || controller.queue().len() > 40).await;

        let started = std::time::Instant::now();
        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("controller stop must not drain the queue")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(controller.queue().is_empty());
        assert!(registry.series_count(SUMMARY_FAMILY) < 50 * 3);
    }
}

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use tally_metrics::{ExporterMetrics, MetricRegistry, Outcome};
use tally_ring::ShardRing;
use tally_store::ResourceStore;
use tally_types::{ObjectKey, Resource, ResourceKind, SHARD_OWNER_LABEL};

use crate::config::ReconcileConfig;
use crate::error::ReconcileResult;
use crate::jitter::next_interval;
use crate::kinds::ReportExporter;

/// What one reconciliation pass did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Owned here; `series` values were written.
    Published { series: usize },
    /// Owned elsewhere; `series` local series were removed.
    Retracted { series: usize },
    /// Owned and being deleted; `series` were removed.
    Deleted { series: usize },
    /// No longer in the store; `series` were removed.
    Gone { series: usize },
}

impl ReconcileAction {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Published { .. } => Outcome::Published,
            Self::Retracted { .. } => Outcome::Retracted,
            Self::Deleted { .. } | Self::Gone { .. } => Outcome::Deleted,
        }
    }
}

/// Reconciles one report kind against the shard ring.
///
/// Each pass is independent: ownership is re-derived from the ring every
/// time and nothing about a report is assumed from earlier passes. The set
/// of locally owned keys is kept only to log ownership transitions.
pub struct OwnershipReconciler {
    store: Arc<dyn ResourceStore>,
    ring: Arc<ShardRing>,
    registry: Arc<dyn MetricRegistry>,
    exporter: Arc<dyn ReportExporter>,
    telemetry: Option<ExporterMetrics>,
    config: ReconcileConfig,
    owned: Mutex<HashSet<ObjectKey>>,
}

impl OwnershipReconciler {
    /// Build a reconciler and declare the exporter's families.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        ring: Arc<ShardRing>,
        registry: Arc<dyn MetricRegistry>,
        exporter: Arc<dyn ReportExporter>,
        config: ReconcileConfig,
    ) -> ReconcileResult<Self> {
        exporter.declare(registry.as_ref())?;
        Ok(Self {
            store,
            ring,
            registry,
            exporter,
            telemetry: None,
            config,
            owned: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_telemetry(mut self, telemetry: ExporterMetrics) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.exporter.kind()
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn ring(&self) -> &Arc<ShardRing> {
        &self.ring
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Whether the last pass over `key` found it owned here.
    pub fn is_owned_locally(&self, key: &ObjectKey) -> bool {
        self.owned
            .lock()
            .expect("owned keys lock poisoned")
            .contains(key)
    }

    /// Run one pass over `key`.
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<ReconcileAction> {
        let kind = self.kind();
        let Some(resource) = self.store.get(kind, key).await? else {
            let series = self.retract(key)?;
            self.mark(key, false);
            debug!(%kind, %key, series, "report gone; retracted");
            return Ok(ReconcileAction::Gone { series });
        };

        let owned = self.ring.should_own(&key.to_string());
        self.mark(key, owned);
        if !owned {
            let series = self.retract(key)?;
            debug!(%kind, %key, series, owner = ?self.ring.locate_owner(&key.to_string()), "not owned here");
            return Ok(ReconcileAction::Retracted { series });
        }

        if resource.metadata.deletion_requested {
            return self.finalize(resource).await;
        }

        let series = self.publish(&resource)?;
        self.claim(resource).await?;
        Ok(ReconcileAction::Published { series })
    }

    /// Run one pass, log and count its outcome, and pick the next delay.
    ///
    /// Never fails: errors are logged and retried after the same jittered
    /// interval as successes. Returns `None` once the report is gone from
    /// the store, since only a new event can bring it back.
    pub async fn reconcile_and_schedule(&self, key: &ObjectKey) -> Option<Duration> {
        let kind = self.kind();
        let mut gone = false;
        let outcome = match self.reconcile(key).await {
            Ok(action) => {
                if let Some(t) = &self.telemetry {
                    if let ReconcileAction::Retracted { series }
                    | ReconcileAction::Deleted { series }
                    | ReconcileAction::Gone { series } = action
                    {
                        t.record_retracted(kind.as_str(), series);
                    }
                }
                gone = matches!(action, ReconcileAction::Gone { .. });
                action.outcome()
            }
            Err(e) => {
                warn!(%kind, %key, error = %e, "reconciliation failed; will retry");
                Outcome::Error
            }
        };
        if let Some(t) = &self.telemetry {
            t.record_outcome(kind.as_str(), outcome);
        }
        if gone {
            return None;
        }
        Some(next_interval(
            self.config.requeue_interval(),
            self.config.max_jitter_percent,
        ))
    }

    /// Remove every series of `key` in every family. Zero matches is fine.
    pub fn retract(&self, key: &ObjectKey) -> ReconcileResult<usize> {
        let identity = self.exporter.identity(key);
        let mut removed = 0;
        for family in self.exporter.families() {
            removed += self.registry.delete_partial_match(&family.name, &identity)?;
        }
        Ok(removed)
    }

    /// Replace the report's series, family by family.
    ///
    /// All series of a family are computed before any is written, and the
    /// family's old series for this report are dropped first so label
    /// values that changed do not linger.
    pub fn publish(&self, resource: &Resource) -> ReconcileResult<usize> {
        let identity = self.exporter.identity(&resource.key());
        let batches = self.exporter.series(resource)?;

        let mut written = 0;
        for batch in batches {
            self.registry.delete_partial_match(&batch.family, &identity)?;
            for (labels, value) in &batch.series {
                self.registry.set(&batch.family, labels, *value)?;
            }
            written += batch.series.len();
        }
        Ok(written)
    }

    /// Drop the finalizer and record this replica as owner.
    ///
    /// The owner label is advisory, so failing to write it only warns.
    /// Failing to drop a finalizer is an error: it would block deletion.
    async fn claim(&self, mut resource: Resource) -> ReconcileResult<()> {
        let kind = self.kind();
        let key = resource.key();
        let me = self.ring.self_address().as_str().to_string();

        let dropped_finalizer = resource.metadata.remove_finalizer(kind.finalizer());
        let relabelled = resource.metadata.label(SHARD_OWNER_LABEL) != Some(me.as_str());
        if !dropped_finalizer && !relabelled {
            return Ok(());
        }
        resource
            .metadata
            .labels
            .insert(SHARD_OWNER_LABEL.to_string(), me);

        match self.store.update(resource).await {
            Ok(_) => Ok(()),
            Err(e) if !dropped_finalizer => {
                warn!(%kind, %key, error = %e, "could not write owner label");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Owned report being deleted: retract, then release the finalizer.
    async fn finalize(&self, mut resource: Resource) -> ReconcileResult<ReconcileAction> {
        let kind = self.kind();
        let key = resource.key();
        let series = self.retract(&key)?;
        self.mark(&key, false);

        if resource.metadata.remove_finalizer(kind.finalizer()) {
            self.store.update(resource).await?;
            info!(%kind, %key, series, "released finalizer of deleted report");
        }
        Ok(ReconcileAction::Deleted { series })
    }

    fn mark(&self, key: &ObjectKey, owned: bool) {
        let changed = {
            let mut keys = self.owned.lock().expect("owned keys lock poisoned");
            if owned {
                keys.insert(key.clone())
            } else {
                keys.remove(key)
            }
        };
        if changed {
            let kind = self.kind();
            if owned {
                info!(%kind, %key, "took ownership");
            } else {
                info!(%kind, %key, "released ownership");
            }
        }
    }
}

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

use crate::error::MetricsResult;

/// Result of one reconciliation pass, as counted in `tally_reconcile_total`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Owned here; series published.
    Published,
    /// Not owned here; local series retracted.
    Retracted,
    /// Gone or being deleted; series retracted.
    Deleted,
    /// The pass failed and was requeued.
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Retracted => "retracted",
            Self::Deleted => "deleted",
            Self::Error => "error",
        }
    }
}

/// The exporter's own metrics, exposed next to the report families.
#[derive(Clone)]
pub struct ExporterMetrics {
    ring_members: IntGauge,
    reconcile_total: IntCounterVec,
    series_retracted_total: IntCounterVec,
}

impl ExporterMetrics {
    /// Create the collectors without registering them anywhere.
    pub fn new() -> MetricsResult<Self> {
        let ring_members = IntGauge::with_opts(Opts::new(
            "tally_ring_members",
            "Number of exporter replicas in the local shard ring",
        ))?;
        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "tally_reconcile_total",
                "Reconciliation passes by report kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let series_retracted_total = IntCounterVec::new(
            Opts::new(
                "tally_series_retracted_total",
                "Metric series removed by partial-match retraction",
            ),
            &["kind"],
        )?;
        Ok(Self {
            ring_members,
            reconcile_total,
            series_retracted_total,
        })
    }

    /// Create the collectors and register them on `registry`.
    pub fn register(registry: &Registry) -> MetricsResult<Self> {
        let metrics = Self::new()?;
        registry.register(Box::new(metrics.ring_members.clone()))?;
        registry.register(Box::new(metrics.reconcile_total.clone()))?;
        registry.register(Box::new(metrics.series_retracted_total.clone()))?;
        Ok(metrics)
    }

    pub fn set_ring_members(&self, members: usize) {
        self.ring_members
            .set(i64::try_from(members).unwrap_or(i64::MAX));
    }

    pub fn record_outcome(&self, kind: &str, outcome: Outcome) {
        self.reconcile_total
            .with_label_values(&[kind, outcome.as_str()])
            .inc();
    }

    pub fn record_retracted(&self, kind: &str, series: usize) {
        if series > 0 {
            self.series_retracted_total
                .with_label_values(&[kind])
                .inc_by(series as u64);
        }
    }

    pub fn ring_members(&self) -> i64 {
        self.ring_members.get()
    }

    pub fn outcomes(&self, kind: &str, outcome: Outcome) -> u64 {
        self.reconcile_total
            .with_label_values(&[kind, outcome.as_str()])
            .get()
    }

    pub fn retracted(&self, kind: &str) -> u64 {
        self.series_retracted_total.with_label_values(&[kind]).get()
    }
}

use tally_metrics::MetricsError;
use tally_ring::RingError;
use tally_store::StoreError;
use tally_types::ResourceKind;

/// Errors from reconciliation and its setup.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Resource store failure; transient ones are retried on the next trigger.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// Metric registry failure.
    #[error("metrics: {0}")]
    Metrics(#[from] MetricsError),

    /// Shard ring failure.
    #[error("ring: {0}")]
    Ring(#[from] RingError),

    /// A resource of one kind was handed to another kind's exporter.
    #[error("expected a {expected} report, got {found}")]
    WrongKind {
        expected: ResourceKind,
        found: ResourceKind,
    },

    /// Configuration rejected at startup.
    #[error("invalid reconcile configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

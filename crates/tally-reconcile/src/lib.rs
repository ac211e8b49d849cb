//! Ownership-aware reconciliation for tally.
//!
//! One [`Controller`] runs per enabled report kind. It feeds a per-key
//! [`WorkQueue`] from store watch events, ring membership changes, and a
//! periodic resync; its workers hand each key to the kind's
//! [`OwnershipReconciler`], which consults the shard ring and either
//! publishes the report's series or retracts them.
//!
//! # Ownership protocol
//!
//! 1. Fetch the report. Missing: retract its series by identity and stop
//!    requeueing the key until a new event names it.
//! 2. Ask the ring whether this replica owns the report's key.
//! 3. Owned: rebuild every family's series for the report, drop any stale
//!    finalizer, and label the report with this replica's address.
//! 4. Not owned: retract by identity, whether or not anything was published.
//! 5. Requeue the key after a jittered interval.
//!
//! At exit, [`ShutdownHandoff`] clears the owner label from every report
//! this replica claimed so survivors re-check them promptly.

pub mod config;
pub mod controller;
pub mod error;
pub mod handoff;
pub mod jitter;
pub mod kinds;
pub mod queue;
pub mod reconciler;

pub use config::ReconcileConfig;
pub use controller::Controller;
pub use error::{ReconcileError, ReconcileResult};
pub use handoff::{HandoffReport, ShutdownHandoff};
pub use jitter::{next_interval, next_interval_with, MAX_JITTER_PERCENT};
pub use kinds::{
    exporter_for, CisExporter, ConfigAuditExporter, FamilyBatch, ReportExporter,
    VulnerabilityExporter,
};
pub use queue::WorkQueue;
pub use reconciler::{OwnershipReconciler, ReconcileAction};

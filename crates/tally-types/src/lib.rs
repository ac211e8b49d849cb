//! Foundation types for tally.
//!
//! Every other tally crate depends on `tally-types`. The types here are plain
//! data: they carry no locks, perform no I/O, and know nothing about hashing
//! or metrics.
//!
//! # Key Types
//!
//! - [`PeerAddress`]: network identity of one exporter replica
//! - [`ObjectKey`]: stable identity (namespace/name) of a watched report
//! - [`ObjectMeta`]: mutable bookkeeping: labels, finalizers, version
//! - [`Resource`]: a watched report: metadata plus a typed [`ReportBody`]
//! - [`ResourceKind`]: which report kind a resource is

pub mod error;
pub mod object;
pub mod peer;
pub mod report;

pub use error::TypeError;
pub use object::{ObjectKey, ObjectMeta, Resource, ResourceKind};
pub use peer::PeerAddress;
pub use report::{
    CisKubeBenchReport, CisResult, CisSection, CisSummary, CisTest, ConfigAuditCheck,
    ConfigAuditReport, ConfigAuditSummary, ImageArtifact, ImageRegistry, ReportBody, Scanner,
    Vulnerability, VulnerabilityReport, VulnerabilitySummary,
};

/// Label written on a report to record which replica last claimed it.
///
/// Advisory only: the shard ring is authoritative for ownership.
pub const SHARD_OWNER_LABEL: &str = "tally.dev/shard-owner";

/// Default name of the service whose endpoints list the exporter replicas.
pub const DEFAULT_SERVICE_NAME: &str = "starboard-exporter";

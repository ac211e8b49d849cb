//! Per-kind metric families and the series they hold for one report.

pub mod cis;
pub mod config_audit;
pub mod vulnerability;

use std::sync::Arc;

use tally_metrics::{FamilySpec, LabelDescriptor, LabelValues, MetricRegistry};
use tally_types::{ObjectKey, Resource, ResourceKind};

use crate::error::ReconcileResult;

pub use cis::{cis_schema, CisExporter, CisSchema};
pub use config_audit::{config_audit_schema, ConfigAuditExporter, ConfigAuditSchema};
pub use vulnerability::{vulnerability_schema, VulnerabilityExporter, VulnerabilitySchema};

/// Every series one family holds for one report.
#[derive(Clone, Debug, PartialEq)]
pub struct FamilyBatch {
    pub family: String,
    pub series: Vec<(LabelValues, f64)>,
}

/// Maps one report kind onto metric families.
///
/// Every family an exporter declares carries the kind's identity labels,
/// so [`ReportExporter::identity`] is enough to retract a report's series
/// without knowing what was published.
pub trait ReportExporter: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Families to declare, given the configured target labels.
    fn families(&self) -> Vec<FamilySpec>;

    /// Partial label vector naming one report in every family.
    fn identity(&self, key: &ObjectKey) -> LabelValues;

    /// Compute all series for `resource`, one batch per family.
    fn series(&self, resource: &Resource) -> ReconcileResult<Vec<FamilyBatch>>;

    /// Label names resolved from the operator's selection.
    fn target_labels(&self) -> &[String];

    /// Every field the kind can expose, for listing.
    fn descriptors(&self) -> Vec<LabelDescriptor>;

    /// Group names accepted in a selection, starting with `all`.
    fn groups(&self) -> Vec<String>;

    fn declare(&self, registry: &dyn MetricRegistry) -> ReconcileResult<()> {
        for family in self.families() {
            registry.declare_family(family)?;
        }
        Ok(())
    }
}

/// Build the exporter for `kind` with the given target-label selection.
///
/// Unknown label names in `selection` are rejected here, before any
/// reconciliation starts.
pub fn exporter_for(kind: ResourceKind, selection: &str) -> ReconcileResult<Arc<dyn ReportExporter>> {
    Ok(match kind {
        ResourceKind::CisKubeBenchReport => Arc::new(CisExporter::new(selection)?),
        ResourceKind::ConfigAuditReport => Arc::new(ConfigAuditExporter::new(selection)?),
        ResourceKind::VulnerabilityReport => Arc::new(VulnerabilityExporter::new(selection)?),
    })
}

use tally_metrics::{labels, FamilySpec, LabelDescriptor, LabelSchema, LabelValues};
use tally_types::{ConfigAuditCheck, ConfigAuditReport, ObjectKey, ReportBody, Resource, ResourceKind};

use crate::error::{ReconcileError, ReconcileResult};
use crate::kinds::{FamilyBatch, ReportExporter};

pub const SUMMARY_FAMILY: &str = "tally_configauditreport_resource_checks_summary_count";
pub const CHECK_FAMILY: &str = "tally_configauditreport_check_info";

const RESOURCE_NAME: &str = "resource_name";
const RESOURCE_NAMESPACE: &str = "resource_namespace";

/// Config audit reports have no section level.
pub type ConfigAuditSchema = LabelSchema<ConfigAuditReport, (), ConfigAuditCheck>;

pub fn config_audit_schema() -> ConfigAuditSchema {
    ConfigAuditSchema::new(
        ResourceKind::ConfigAuditReport.as_str(),
        &[RESOURCE_NAME, RESOURCE_NAMESPACE],
    )
    .report(RESOURCE_NAME, &["summary", "check"], |meta, _| meta.name.clone())
    .report(RESOURCE_NAMESPACE, &["summary", "check"], |meta, _| {
        meta.namespace.clone().unwrap_or_default()
    })
    .report("scanner_name", &["summary"], |_, r| r.scanner.name.clone())
    .report("scanner_version", &["summary"], |_, r| r.scanner.version.clone())
    .result("check_id", &["check"], |c| c.check_id.clone())
    .result("check_title", &["check"], |c| c.title.clone())
    .result("check_severity", &["check"], |c| c.severity.clone())
    .result("check_category", &["check"], |c| c.category.clone())
    .result("check_success", &["check"], |c| c.success.to_string())
}

/// Per-severity check counts for each audited workload, plus optional
/// per-check info series.
pub struct ConfigAuditExporter {
    schema: ConfigAuditSchema,
    target_labels: Vec<String>,
}

impl ConfigAuditExporter {
    pub fn new(selection: &str) -> ReconcileResult<Self> {
        let schema = config_audit_schema();
        let target_labels = schema.select(selection)?;
        Ok(Self {
            schema,
            target_labels,
        })
    }

    pub fn schema(&self) -> &ConfigAuditSchema {
        &self.schema
    }
}

impl ReportExporter for ConfigAuditExporter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ConfigAuditReport
    }

    fn families(&self) -> Vec<FamilySpec> {
        let mut families = vec![FamilySpec::new(
            SUMMARY_FAMILY,
            "Number of configuration checks per resource by severity",
            [RESOURCE_NAME, RESOURCE_NAMESPACE, "severity"],
        )];
        if !self.target_labels.is_empty() {
            families.push(FamilySpec::new(
                CHECK_FAMILY,
                "One series per configuration check, labelled with the configured fields",
                self.target_labels.clone(),
            ));
        }
        families
    }

    fn identity(&self, key: &ObjectKey) -> LabelValues {
        labels([
            (RESOURCE_NAME, key.name.as_str()),
            (RESOURCE_NAMESPACE, key.namespace_or_empty()),
        ])
    }

    fn series(&self, resource: &Resource) -> ReconcileResult<Vec<FamilyBatch>> {
        let report = match &resource.body {
            ReportBody::ConfigAudit(report) => report,
            other => {
                return Err(ReconcileError::WrongKind {
                    expected: ResourceKind::ConfigAuditReport,
                    found: other.kind(),
                })
            }
        };
        let meta = &resource.metadata;
        let id = self.schema.identity(meta, report);

        let s = &report.summary;
        let summary = [
            ("danger", s.danger_count),
            ("warning", s.warning_count),
            ("pass", s.pass_count),
        ]
        .into_iter()
        .map(|(severity, count)| {
            let mut v = id.clone();
            v.insert("severity".into(), severity.into());
            (v, f64::from(count))
        })
        .collect();

        let mut batches = vec![FamilyBatch {
            family: SUMMARY_FAMILY.into(),
            series: summary,
        }];

        if !self.target_labels.is_empty() {
            let checks = report
                .checks
                .iter()
                .map(|check| {
                    let v = self
                        .schema
                        .vector(&self.target_labels, meta, report, None, Some(check));
                    (v, 1.0)
                })
                .collect();
            batches.push(FamilyBatch {
                family: CHECK_FAMILY.into(),
                series: checks,
            });
        }
        Ok(batches)
    }

    fn target_labels(&self) -> &[String] {
        &self.target_labels
    }

    fn descriptors(&self) -> Vec<LabelDescriptor> {
        self.schema.descriptors().cloned().collect()
    }

    fn groups(&self) -> Vec<String> {
        self.schema.groups()
    }
}

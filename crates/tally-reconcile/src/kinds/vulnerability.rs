use tally_metrics::{labels, FamilySpec, LabelDescriptor, LabelSchema, LabelValues};
use tally_types::{
    ObjectKey, ReportBody, Resource, ResourceKind, Vulnerability, VulnerabilityReport,
};

use crate::error::{ReconcileError, ReconcileResult};
use crate::kinds::{FamilyBatch, ReportExporter};

pub const SUMMARY_FAMILY: &str = "tally_vulnerabilityreport_image_vulnerability_severity_count";
pub const VULNERABILITY_FAMILY: &str = "tally_vulnerabilityreport_image_vulnerability";

const REPORT_NAME: &str = "report_name";
const IMAGE_NAMESPACE: &str = "image_namespace";
const IMAGE_LABELS: [&str; 4] = ["image_registry", "image_repository", "image_tag", "image_digest"];

/// Vulnerability reports have no section level.
pub type VulnerabilitySchema = LabelSchema<VulnerabilityReport, (), Vulnerability>;

pub fn vulnerability_schema() -> VulnerabilitySchema {
    VulnerabilitySchema::new(
        ResourceKind::VulnerabilityReport.as_str(),
        &[REPORT_NAME, IMAGE_NAMESPACE],
    )
    .report(REPORT_NAME, &["image"], |meta, _| meta.name.clone())
    .report(IMAGE_NAMESPACE, &["image"], |meta, _| {
        meta.namespace.clone().unwrap_or_default()
    })
    .report("image_registry", &["image"], |_, r| r.registry.server.clone())
    .report("image_repository", &["image"], |_, r| r.artifact.repository.clone())
    .report("image_tag", &["image"], |_, r| r.artifact.tag.clone())
    .report("image_digest", &["image"], |_, r| r.artifact.digest.clone())
    .report("scanner_name", &["scanner"], |_, r| r.scanner.name.clone())
    .report("scanner_version", &["scanner"], |_, r| r.scanner.version.clone())
    .result("vulnerability_id", &["vulnerability"], |v| v.vulnerability_id.clone())
    .result("vulnerability_title", &["vulnerability"], |v| v.title.clone())
    .result("vulnerability_severity", &["vulnerability"], |v| v.severity.clone())
    .result("vulnerability_score", &["vulnerability"], |v| {
        v.score.map(|s| s.to_string()).unwrap_or_default()
    })
    .result("vulnerability_link", &["vulnerability"], |v| v.primary_link.clone())
    .result("vulnerable_resource_name", &["vulnerability"], |v| v.resource.clone())
    .result("installed_resource_version", &["vulnerability"], |v| {
        v.installed_version.clone()
    })
    .result("fixed_resource_version", &["vulnerability"], |v| v.fixed_version.clone())
}

/// Per-severity vulnerability counts for each scanned image, plus optional
/// per-vulnerability series valued by CVSS score.
pub struct VulnerabilityExporter {
    schema: VulnerabilitySchema,
    target_labels: Vec<String>,
}

impl VulnerabilityExporter {
    pub fn new(selection: &str) -> ReconcileResult<Self> {
        let schema = vulnerability_schema();
        let target_labels = schema.select(selection)?;
        Ok(Self {
            schema,
            target_labels,
        })
    }

    pub fn schema(&self) -> &VulnerabilitySchema {
        &self.schema
    }

    fn summary_labels() -> Vec<String> {
        let mut names = vec![REPORT_NAME.to_string(), IMAGE_NAMESPACE.to_string()];
        names.extend(IMAGE_LABELS.iter().map(|l| l.to_string()));
        names
    }
}

impl ReportExporter for VulnerabilityExporter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VulnerabilityReport
    }

    fn families(&self) -> Vec<FamilySpec> {
        let mut summary = Self::summary_labels();
        summary.push("severity".to_string());
        let mut families = vec![FamilySpec::new(
            SUMMARY_FAMILY,
            "Number of vulnerabilities per image by severity",
            summary,
        )];
        if !self.target_labels.is_empty() {
            families.push(FamilySpec::new(
                VULNERABILITY_FAMILY,
                "One series per image vulnerability, valued by its CVSS score",
                self.target_labels.clone(),
            ));
        }
        families
    }

    fn identity(&self, key: &ObjectKey) -> LabelValues {
        labels([
            (REPORT_NAME, key.name.as_str()),
            (IMAGE_NAMESPACE, key.namespace_or_empty()),
        ])
    }

    fn series(&self, resource: &Resource) -> ReconcileResult<Vec<FamilyBatch>> {
        let report = match &resource.body {
            ReportBody::Vulnerability(report) => report,
            other => {
                return Err(ReconcileError::WrongKind {
                    expected: ResourceKind::VulnerabilityReport,
                    found: other.kind(),
                })
            }
        };
        let meta = &resource.metadata;
        let image = self
            .schema
            .vector(&Self::summary_labels(), meta, report, None, None);

        let s = &report.summary;
        let summary = [
            ("CRITICAL", s.critical_count),
            ("HIGH", s.high_count),
            ("MEDIUM", s.medium_count),
            ("LOW", s.low_count),
            ("UNKNOWN", s.unknown_count),
        ]
        .into_iter()
        .map(|(severity, count)| {
            let mut v = image.clone();
            v.insert("severity".into(), severity.into());
            (v, f64::from(count))
        })
        .collect();

        let mut batches = vec![FamilyBatch {
            family: SUMMARY_FAMILY.into(),
            series: summary,
        }];

        if !self.target_labels.is_empty() {
            let series = report
                .vulnerabilities
                .iter()
                .map(|vuln| {
                    let v = self
                        .schema
                        .vector(&self.target_labels, meta, report, None, Some(vuln));
                    (v, vuln.score.unwrap_or(0.0))
                })
                .collect();
            batches.push(FamilyBatch {
                family: VULNERABILITY_FAMILY.into(),
                series,
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

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::{ImageArtifact, ImageRegistry, VulnerabilitySummary};

    fn image_report() -> Resource {
        Resource::new(
            &ObjectKey::namespaced("payments", "replicaset-api-7d9f-api"),
            ReportBody::Vulnerability(VulnerabilityReport {
                registry: ImageRegistry {
                    server: "ghcr.io".into(),
                },
                artifact: ImageArtifact {
                    repository: "acme/api".into(),
                    tag: "1.4.2".into(),
                    digest: String::new(),
                },
                summary: VulnerabilitySummary {
                    critical_count: 1,
                    high_count: 4,
                    ..Default::default()
                },
                vulnerabilities: vec![
                    Vulnerability {
                        vulnerability_id: "CVE-2023-4911".into(),
                        resource: "glibc".into(),
                        severity: "HIGH".into(),
                        score: Some(7.8),
                        ..Default::default()
                    },
                    Vulnerability {
                        vulnerability_id: "CVE-2024-0001".into(),
                        severity: "UNKNOWN".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
        )
    }

    #[test]
    fn summary_per_severity_carries_image_labels() {
        let exporter = VulnerabilityExporter::new("").unwrap();
        let batches = exporter.series(&image_report()).unwrap();
        assert_eq!(batches.len(), 1);

        let series = &batches[0].series;
        assert_eq!(series.len(), 5);
        let (critical, value) = &series[0];
        assert_eq!(critical["severity"], "CRITICAL");
        assert_eq!(*value, 1.0);
        assert_eq!(critical[REPORT_NAME], "replicaset-api-7d9f-api");
        assert_eq!(critical[IMAGE_NAMESPACE], "payments");
        assert_eq!(critical["image_registry"], "ghcr.io");
        assert_eq!(critical["image_repository"], "acme/api");
        assert_eq!(critical["image_tag"], "1.4.2");
        assert_eq!(series[1].1, 4.0);
    }

    #[test]
    fn vulnerability_series_valued_by_score() {
        let exporter =
            VulnerabilityExporter::new("vulnerability_id,vulnerable_resource_name").unwrap();
        assert_eq!(
            exporter.target_labels(),
            ["vulnerability_id", "vulnerable_resource_name", REPORT_NAME, IMAGE_NAMESPACE]
        );

        let batches = exporter.series(&image_report()).unwrap();
        let vulns = &batches[1];
        assert_eq!(vulns.family, VULNERABILITY_FAMILY);
        assert_eq!(vulns.series.len(), 2);
        assert_eq!(vulns.series[0].0["vulnerable_resource_name"], "glibc");
        assert_eq!(vulns.series[0].1, 7.8);
        assert_eq!(vulns.series[1].0["vulnerability_id"], "CVE-2024-0001");
        assert_eq!(vulns.series[1].1, 0.0);
    }

    #[test]
    fn identity_matches_published_labels() {
        let exporter = VulnerabilityExporter::new("all").unwrap();
        let resource = image_report();
        let id = exporter.identity(&resource.key());
        for family in exporter.families() {
            for name in id.keys() {
                assert!(family.label_names.contains(name), "{} lacks {name}", family.name);
            }
        }
        for batch in exporter.series(&resource).unwrap() {
            for (labels, _) in batch.series {
                for (k, v) in &id {
                    assert_eq!(&labels[k], v);
                }
            }
        }
    }

    #[test]
    fn score_label_is_empty_without_a_score() {
        let exporter = VulnerabilityExporter::new("vulnerability_score").unwrap();
        let batches = exporter.series(&image_report()).unwrap();
        assert_eq!(batches[1].series[0].0["vulnerability_score"], "7.8");
        assert_eq!(batches[1].series[1].0["vulnerability_score"], "");
        assert_eq!(
            exporter.groups(),
            vec!["all", "image", "scanner", "vulnerability"]
        );
    }
}

use tally_metrics::{labels, FamilySpec, LabelDescriptor, LabelSchema, LabelValues};
use tally_types::{
    CisKubeBenchReport, CisResult, CisSection, ObjectKey, ReportBody, Resource, ResourceKind,
};

use crate::error::{ReconcileError, ReconcileResult};
use crate::kinds::{FamilyBatch, ReportExporter};

pub const SUMMARY_FAMILY: &str = "tally_ciskubebenchreport_report_summary_count";
pub const SECTION_FAMILY: &str = "tally_ciskubebenchreport_section_summary_count";
pub const RESULT_FAMILY: &str = "tally_ciskubebenchreport_result_info";

const NODE_NAME: &str = "node_name";

pub type CisSchema = LabelSchema<CisKubeBenchReport, CisSection, CisResult>;

/// Fields of a CIS kube-bench report that may become labels.
pub fn cis_schema() -> CisSchema {
    CisSchema::new(ResourceKind::CisKubeBenchReport.as_str(), &[NODE_NAME])
        .report(NODE_NAME, &["summary", "section", "result"], |meta, _| {
            meta.name.clone()
        })
        .report("pass_count", &["summary"], |_, r| r.summary.pass_count.to_string())
        .report("info_count", &["summary"], |_, r| r.summary.info_count.to_string())
        .report("warn_count", &["summary"], |_, r| r.summary.warn_count.to_string())
        .report("fail_count", &["summary"], |_, r| r.summary.fail_count.to_string())
        .section("node_type", &["section", "result"], |s| s.node_type.clone())
        .section("section_name", &["section", "result"], |s| s.text.clone())
        .section("total_pass", &["section"], |s| s.total_pass.to_string())
        .section("total_info", &["section"], |s| s.total_info.to_string())
        .section("total_warn", &["section"], |s| s.total_warn.to_string())
        .section("total_fail", &["section"], |s| s.total_fail.to_string())
        .result("test_number", &["result"], |r| r.test_number.clone())
        .result("test_desc", &["result"], |r| r.test_desc.clone())
        .result("test_status", &["result"], |r| r.status.clone())
        .result("scored", &["result"], |r| r.scored.to_string())
}

fn per_status(pass: u32, info: u32, warn: u32, fail: u32) -> [(&'static str, f64); 4] {
    [
        ("PASS", f64::from(pass)),
        ("INFO", f64::from(info)),
        ("WARN", f64::from(warn)),
        ("FAIL", f64::from(fail)),
    ]
}

/// Node benchmark summaries, per-section summaries, and optional per-result
/// info series.
pub struct CisExporter {
    schema: CisSchema,
    target_labels: Vec<String>,
}

impl CisExporter {
    pub fn new(selection: &str) -> ReconcileResult<Self> {
        let schema = cis_schema();
        let target_labels = schema.select(selection)?;
        Ok(Self {
            schema,
            target_labels,
        })
    }

    pub fn schema(&self) -> &CisSchema {
        &self.schema
    }

    fn report<'a>(&self, resource: &'a Resource) -> ReconcileResult<&'a CisKubeBenchReport> {
        match &resource.body {
            ReportBody::CisKubeBench(report) => Ok(report),
            other => Err(ReconcileError::WrongKind {
                expected: ResourceKind::CisKubeBenchReport,
                found: other.kind(),
            }),
        }
    }
}

impl ReportExporter for CisExporter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::CisKubeBenchReport
    }

    fn families(&self) -> Vec<FamilySpec> {
        let mut families = vec![
            FamilySpec::new(
                SUMMARY_FAMILY,
                "Number of CIS benchmark checks per node by status",
                [NODE_NAME, "status"],
            ),
            FamilySpec::new(
                SECTION_FAMILY,
                "Number of CIS benchmark checks per node section by status",
                [NODE_NAME, "node_type", "section_name", "status"],
            ),
        ];
        if !self.target_labels.is_empty() {
            families.push(FamilySpec::new(
                RESULT_FAMILY,
                "One series per CIS benchmark result, labelled with the configured fields",
                self.target_labels.clone(),
            ));
        }
        families
    }

    fn identity(&self, key: &ObjectKey) -> LabelValues {
        labels([(NODE_NAME, key.name.as_str())])
    }

    fn series(&self, resource: &Resource) -> ReconcileResult<Vec<FamilyBatch>> {
        let report = self.report(resource)?;
        let meta = &resource.metadata;

        let node = self.schema.identity(meta, report);
        let s = &report.summary;
        let summary = per_status(s.pass_count, s.info_count, s.warn_count, s.fail_count)
            .into_iter()
            .map(|(status, count)| {
                let mut v = node.clone();
                v.insert("status".into(), status.into());
                (v, count)
            })
            .collect();

        let section_labels = [NODE_NAME, "node_type", "section_name"].map(String::from);
        let mut sections = Vec::new();
        for section in &report.sections {
            let base = self
                .schema
                .vector(&section_labels, meta, report, Some(section), None);
            let counts = per_status(
                section.total_pass,
                section.total_info,
                section.total_warn,
                section.total_fail,
            );
            for (status, count) in counts {
                let mut v = base.clone();
                v.insert("status".into(), status.into());
                sections.push((v, count));
            }
        }

        let mut batches = vec![
            FamilyBatch {
                family: SUMMARY_FAMILY.into(),
                series: summary,
            },
            FamilyBatch {
                family: SECTION_FAMILY.into(),
                series: sections,
            },
        ];

        if !self.target_labels.is_empty() {
            let mut results = Vec::new();
            for section in &report.sections {
                for result in section.tests.iter().flat_map(|t| t.results.iter()) {
                    let v = self.schema.vector(
                        &self.target_labels,
                        meta,
                        report,
                        Some(section),
                        Some(result),
                    );
                    results.push((v, 1.0));
                }
            }
            batches.push(FamilyBatch {
                family: RESULT_FAMILY.into(),
                series: results,
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

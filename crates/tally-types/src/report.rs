//! Report bodies as produced by the scanners.
//!
//! Field names follow the scanners' JSON (camelCase) so reports can be stored
//! and exchanged verbatim. Missing fields deserialize to their defaults.

use serde::{Deserialize, Serialize};

use crate::object::ResourceKind;

/// Typed body of a watched resource, tagged by kind in JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "report")]
pub enum ReportBody {
    #[serde(rename = "ciskubebenchreport")]
    CisKubeBench(CisKubeBenchReport),
    #[serde(rename = "configauditreport")]
    ConfigAudit(ConfigAuditReport),
    #[serde(rename = "vulnerabilityreport")]
    Vulnerability(VulnerabilityReport),
}

impl ReportBody {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::CisKubeBench(_) => ResourceKind::CisKubeBenchReport,
            Self::ConfigAudit(_) => ResourceKind::ConfigAuditReport,
            Self::Vulnerability(_) => ResourceKind::VulnerabilityReport,
        }
    }
}

/// Identity of the scanner that produced a report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scanner {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// CIS kube-bench
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CisKubeBenchReport {
    pub scanner: Scanner,
    pub summary: CisSummary,
    pub sections: Vec<CisSection>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CisSummary {
    pub pass_count: u32,
    pub info_count: u32,
    pub warn_count: u32,
    pub fail_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CisSection {
    pub id: String,
    pub version: String,
    pub text: String,
    pub node_type: String,
    pub total_pass: u32,
    pub total_info: u32,
    pub total_warn: u32,
    pub total_fail: u32,
    pub tests: Vec<CisTest>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CisTest {
    pub section: String,
    pub desc: String,
    pub results: Vec<CisResult>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CisResult {
    pub test_number: String,
    pub test_desc: String,
    pub status: String,
    pub scored: bool,
    pub remediation: String,
}

// ---------------------------------------------------------------------------
// Config audit
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigAuditReport {
    pub scanner: Scanner,
    pub summary: ConfigAuditSummary,
    pub checks: Vec<ConfigAuditCheck>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigAuditSummary {
    pub danger_count: u32,
    pub warning_count: u32,
    pub pass_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigAuditCheck {
    #[serde(rename = "checkID")]
    pub check_id: String,
    pub title: String,
    pub severity: String,
    pub category: String,
    pub success: bool,
    pub messages: Vec<String>,
}

// ---------------------------------------------------------------------------
// Image vulnerabilities
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VulnerabilityReport {
    pub scanner: Scanner,
    pub registry: ImageRegistry,
    pub artifact: ImageArtifact,
    pub summary: VulnerabilitySummary,
    pub vulnerabilities: Vec<Vulnerability>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRegistry {
    pub server: String,
}

/// The scanned image, without its registry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageArtifact {
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VulnerabilitySummary {
    pub critical_count: u32,
    pub high_count: u32,
    pub medium_count: u32,
    pub low_count: u32,
    pub unknown_count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Vulnerability {
    #[serde(rename = "vulnerabilityID")]
    pub vulnerability_id: String,
    /// Affected package.
    pub resource: String,
    pub installed_version: String,
    pub fixed_version: String,
    pub severity: String,
    /// CVSS score, when the scanner has one.
    pub score: Option<f64>,
    pub title: String,
    pub primary_link: String,
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::report::ReportBody;

/// The report kinds tally knows how to export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Node-level CIS kube-bench results. Cluster scoped.
    CisKubeBenchReport,
    /// Workload configuration audit results. Namespaced.
    ConfigAuditReport,
    /// Container image vulnerability scans. Namespaced.
    VulnerabilityReport,
}

impl ResourceKind {
    /// Every supported kind, in a stable order.
    pub const ALL: [ResourceKind; 3] = [
        Self::CisKubeBenchReport,
        Self::ConfigAuditReport,
        Self::VulnerabilityReport,
    ];

    /// Lowercase kind name used in metric subsystems, paths, and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CisKubeBenchReport => "ciskubebenchreport",
            Self::ConfigAuditReport => "configauditreport",
            Self::VulnerabilityReport => "vulnerabilityreport",
        }
    }

    /// Finalizer this exporter places on (or removes from) reports of this kind.
    pub fn finalizer(&self) -> &'static str {
        match self {
            Self::CisKubeBenchReport => "tally.dev/ciskubebenchreport",
            Self::ConfigAuditReport => "tally.dev/configauditreport",
            Self::VulnerabilityReport => "tally.dev/vulnerabilityreport",
        }
    }

    /// Whether reports of this kind live in a namespace.
    pub fn is_namespaced(&self) -> bool {
        matches!(self, Self::ConfigAuditReport | Self::VulnerabilityReport)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ciskubebenchreport" | "cis" => Ok(Self::CisKubeBenchReport),
            "configauditreport" | "config-audit" => Ok(Self::ConfigAuditReport),
            "vulnerabilityreport" | "vulnerability" => Ok(Self::VulnerabilityReport),
            _ => Err(TypeError::UnknownKind(s.to_string())),
        }
    }
}

/// Stable identity of a watched report.
///
/// Displays as `namespace/name` for namespaced objects and `name` for
/// cluster-scoped ones. The display form is the shard-ring key, so every
/// replica must render it identically.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Namespace, or the empty string for cluster-scoped objects.
    pub fn namespace_or_empty(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({self})")
    }
}

impl FromStr for ObjectKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidObjectKey(s.to_string());
        match s.split_once('/') {
            Some((ns, name)) => {
                if ns.is_empty() || name.is_empty() || name.contains('/') {
                    return Err(invalid());
                }
                Ok(Self::namespaced(ns, name))
            }
            None if s.is_empty() => Err(invalid()),
            None => Ok(Self::cluster(s)),
        }
    }
}

/// Mutable bookkeeping carried by every watched report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub finalizers: Vec<String>,
    /// Monotonic version assigned by the store on every write.
    pub resource_version: u64,
    /// Set once deletion has been requested; the object lingers until its
    /// finalizers are cleared.
    pub deletion_requested: bool,
}

impl ObjectMeta {
    pub fn new(key: &ObjectKey) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer. Returns `true` if the metadata changed.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove a finalizer. Returns `true` if the metadata changed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }
}

/// A watched report: metadata plus a typed body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub body: ReportBody,
}

impl Resource {
    pub fn new(key: &ObjectKey, body: ReportBody) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            body,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.body.kind()
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

use std::collections::BTreeMap;

use crate::error::{MetricsError, MetricsResult};

/// Label name to label value, for one series or a partial match.
pub type LabelValues = BTreeMap<String, String>;

/// Declaration of a gauge family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamilySpec {
    pub name: String,
    pub help: String,
    /// Ordered label names; every series sets all of them.
    pub label_names: Vec<String>,
}

impl FamilySpec {
    pub fn new<I, S>(name: impl Into<String>, help: impl Into<String>, label_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            help: help.into(),
            label_names: label_names.into_iter().map(Into::into).collect(),
        }
    }

    /// Values for this family's labels in declaration order.
    ///
    /// Fails if a label has no value or a value names an undeclared label.
    pub fn ordered_values(&self, labels: &LabelValues) -> MetricsResult<Vec<String>> {
        self.check_known(labels)?;
        self.label_names
            .iter()
            .map(|name| {
                labels
                    .get(name)
                    .cloned()
                    .ok_or_else(|| MetricsError::MissingLabel {
                        family: self.name.clone(),
                        label: name.clone(),
                    })
            })
            .collect()
    }

    /// Reject labels the family does not declare.
    pub fn check_known(&self, labels: &LabelValues) -> MetricsResult<()> {
        match labels.keys().find(|k| !self.label_names.contains(*k)) {
            Some(unknown) => Err(MetricsError::UnknownLabel {
                label: unknown.clone(),
                context: format!("family {:?}", self.name),
            }),
            None => Ok(()),
        }
    }

    /// Whether the ordered `values` agree with every entry of `partial`.
    pub fn matches_partial(&self, values: &[String], partial: &LabelValues) -> bool {
        partial.iter().all(|(name, want)| {
            self.label_names
                .iter()
                .position(|n| n == name)
                .and_then(|i| values.get(i))
                .is_some_and(|have| have == want)
        })
    }
}

/// Injected collaborator that stores gauge series.
///
/// Implementations must be safe to share between reconciliation workers.
pub trait MetricRegistry: Send + Sync {
    /// Declare a gauge family. Redeclaring with identical labels is a no-op.
    fn declare_family(&self, spec: FamilySpec) -> MetricsResult<()>;

    /// Create or overwrite one series.
    fn set(&self, family: &str, labels: &LabelValues, value: f64) -> MetricsResult<()>;

    /// Delete every series of `family` whose labels include all of `partial`.
    ///
    /// Returns the number of series removed; matching nothing is `Ok(0)`.
    fn delete_partial_match(&self, family: &str, partial: &LabelValues) -> MetricsResult<usize>;

    /// Number of live series in a family (0 for undeclared families).
    fn series_count(&self, family: &str) -> usize;
}

/// Build a [`LabelValues`] from `(name, value)` pairs.
pub fn labels<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> LabelValues {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

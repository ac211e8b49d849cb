use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::{MetricsError, MetricsResult};
use crate::registry::{FamilySpec, LabelValues, MetricRegistry};

#[derive(Default)]
struct State {
    families: HashMap<String, FamilySpec>,
    series: HashMap<String, BTreeMap<Vec<String>, f64>>,
    deletes: Vec<(String, LabelValues)>,
}

/// In-memory [`MetricRegistry`] that remembers every partial-match delete.
///
/// Intended for tests: it applies the same label checks as the Prometheus
/// backend and lets assertions inspect values and retraction calls.
#[derive(Default)]
pub struct InMemoryMetricRegistry {
    state: RwLock<State>,
}

impl InMemoryMetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of the series with exactly these labels.
    pub fn value(&self, family: &str, labels: &LabelValues) -> Option<f64> {
        let state = self.state.read().expect("lock poisoned");
        let values = state.families.get(family)?.ordered_values(labels).ok()?;
        state.series.get(family)?.get(&values).copied()
    }

    /// All live series of a family as label maps, in label-vector order.
    pub fn series(&self, family: &str) -> Vec<(LabelValues, f64)> {
        let state = self.state.read().expect("lock poisoned");
        let (Some(spec), Some(series)) = (state.families.get(family), state.series.get(family))
        else {
            return Vec::new();
        };
        series
            .iter()
            .map(|(values, v)| {
                let labels = spec
                    .label_names
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .collect();
                (labels, *v)
            })
            .collect()
    }

    /// Every `delete_partial_match` call so far, in order.
    pub fn deletes(&self) -> Vec<(String, LabelValues)> {
        self.state.read().expect("lock poisoned").deletes.clone()
    }

    pub fn is_declared(&self, family: &str) -> bool {
        self.state
            .read()
            .expect("lock poisoned")
            .families
            .contains_key(family)
    }
}

impl MetricRegistry for InMemoryMetricRegistry {
    fn declare_family(&self, spec: FamilySpec) -> MetricsResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if let Some(existing) = state.families.get(&spec.name) {
            return if existing.label_names == spec.label_names {
                Ok(())
            } else {
                Err(MetricsError::Redeclared(spec.name))
            };
        }
        state.series.insert(spec.name.clone(), BTreeMap::new());
        state.families.insert(spec.name.clone(), spec);
        Ok(())
    }

    fn set(&self, family: &str, labels: &LabelValues, value: f64) -> MetricsResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        let spec = state
            .families
            .get(family)
            .ok_or_else(|| MetricsError::UnknownFamily(family.to_string()))?;
        let values = spec.ordered_values(labels)?;
        state
            .series
            .entry(family.to_string())
            .or_default()
            .insert(values, value);
        Ok(())
    }

    fn delete_partial_match(&self, family: &str, partial: &LabelValues) -> MetricsResult<usize> {
        let mut state = self.state.write().expect("lock poisoned");
        let spec = state
            .families
            .get(family)
            .cloned()
            .ok_or_else(|| MetricsError::UnknownFamily(family.to_string()))?;
        spec.check_known(partial)?;

        state.deletes.push((family.to_string(), partial.clone()));
        let series = state.series.entry(family.to_string()).or_default();
        let before = series.len();
        series.retain(|values, _| !spec.matches_partial(values, partial));
        Ok(before - series.len())
    }

    fn series_count(&self, family: &str) -> usize {
        self.state
            .read()
            .expect("lock poisoned")
            .series
            .get(family)
            .map_or(0, BTreeMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::labels;

    #[test]
    fn records_deletes_even_when_nothing_matches() {
        let r = InMemoryMetricRegistry::new();
        r.declare_family(FamilySpec::new("f", "h", ["resource_name", "severity"]))
            .unwrap();

        let removed = r
            .delete_partial_match("f", &labels([("resource_name", "x")]))
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(r.deletes(), vec![("f".to_string(), labels([("resource_name", "x")]))]);
    }

    #[test]
    fn set_overwrites_and_series_lists() {
        let r = InMemoryMetricRegistry::new();
        r.declare_family(FamilySpec::new("f", "h", ["resource_name", "severity"]))
            .unwrap();
        let l = labels([("resource_name", "x"), ("severity", "HIGH")]);
        r.set("f", &l, 1.0).unwrap();
        r.set("f", &l, 4.0).unwrap();

        assert_eq!(r.value("f", &l), Some(4.0));
        assert_eq!(r.series("f"), vec![(l, 4.0)]);
    }
}

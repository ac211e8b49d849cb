use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::error::{MetricsError, MetricsResult};
use crate::registry::{FamilySpec, LabelValues, MetricRegistry};

struct Family {
    spec: FamilySpec,
    gauge: GaugeVec,
    /// Label vectors currently set, for partial-match deletion.
    series: BTreeSet<Vec<String>>,
}

/// [`MetricRegistry`] backed by a `prometheus::Registry`.
///
/// The Prometheus client can only remove a series by its full label vector,
/// so each family keeps an index of the vectors it has set and partial
/// matches are resolved against that index.
pub struct PrometheusRegistry {
    registry: Registry,
    families: RwLock<HashMap<String, Family>>,
}

impl PrometheusRegistry {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            families: RwLock::new(HashMap::new()),
        }
    }

    /// Underlying registry, for registering other collectors alongside.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn gather_text(&self) -> MetricsResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

impl Default for PrometheusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry for PrometheusRegistry {
    fn declare_family(&self, spec: FamilySpec) -> MetricsResult<()> {
        let mut families = self.families.write().expect("metric families lock poisoned");
        if let Some(existing) = families.get(&spec.name) {
            return if existing.spec.label_names == spec.label_names {
                Ok(())
            } else {
                Err(MetricsError::Redeclared(spec.name))
            };
        }

        let names: Vec<&str> = spec.label_names.iter().map(String::as_str).collect();
        let gauge = GaugeVec::new(Opts::new(spec.name.clone(), spec.help.clone()), &names)?;
        self.registry.register(Box::new(gauge.clone()))?;
        debug!(family = %spec.name, labels = ?spec.label_names, "declared gauge family");

        families.insert(
            spec.name.clone(),
            Family {
                spec,
                gauge,
                series: BTreeSet::new(),
            },
        );
        Ok(())
    }

    fn set(&self, family: &str, labels: &LabelValues, value: f64) -> MetricsResult<()> {
        let mut families = self.families.write().expect("metric families lock poisoned");
        let entry = families
            .get_mut(family)
            .ok_or_else(|| MetricsError::UnknownFamily(family.to_string()))?;

        let values = entry.spec.ordered_values(labels)?;
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        entry.gauge.get_metric_with_label_values(&refs)?.set(value);
        entry.series.insert(values);
        Ok(())
    }

    fn delete_partial_match(&self, family: &str, partial: &LabelValues) -> MetricsResult<usize> {
        let mut families = self.families.write().expect("metric families lock poisoned");
        let entry = families
            .get_mut(family)
            .ok_or_else(|| MetricsError::UnknownFamily(family.to_string()))?;
        entry.spec.check_known(partial)?;

        let doomed: Vec<Vec<String>> = entry
            .series
            .iter()
            .filter(|values| entry.spec.matches_partial(values, partial))
            .cloned()
            .collect();

        for values in &doomed {
            let refs: Vec<&str> = values.iter().map(String::as_str).collect();
            // Already gone from the client is as good as removed.
            let _ = entry.gauge.remove_label_values(&refs);
            entry.series.remove(values);
        }
        Ok(doomed.len())
    }

    fn series_count(&self, family: &str) -> usize {
        self.families
            .read()
            .expect("metric families lock poisoned")
            .get(family)
            .map_or(0, |f| f.series.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::labels;

    fn registry() -> PrometheusRegistry {
        let r = PrometheusRegistry::new();
        r.declare_family(FamilySpec::new(
            "tally_test_summary_count",
            "test family",
            ["node_name", "status"],
        ))
        .unwrap();
        r
    }

    #[test]
    fn set_then_expose() {
        let r = registry();
        r.set(
            "tally_test_summary_count",
            &labels([("node_name", "n1"), ("status", "FAIL")]),
            3.0,
        )
        .unwrap();

        let text = r.gather_text().unwrap();
        assert!(text.contains("# HELP tally_test_summary_count test family"));
        assert!(text.contains(r#"tally_test_summary_count{node_name="n1",status="FAIL"} 3"#));
    }

    #[test]
    fn partial_delete_removes_only_matching_series() {
        let r = registry();
        let family = "tally_test_summary_count";
        for (node, status) in [("n1", "PASS"), ("n1", "FAIL"), ("n2", "PASS")] {
            r.set(family, &labels([("node_name", node), ("status", status)]), 1.0)
                .unwrap();
        }

        let removed = r
            .delete_partial_match(family, &labels([("node_name", "n1")]))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(r.series_count(family), 1);
        assert!(!r.gather_text().unwrap().contains(r#"node_name="n1""#));
    }

    #[test]
    fn deleting_nothing_is_zero() {
        let r = registry();
        let removed = r
            .delete_partial_match("tally_test_summary_count", &labels([("node_name", "ghost")]))
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn partial_delete_rejects_unknown_label() {
        let r = registry();
        assert!(matches!(
            r.delete_partial_match("tally_test_summary_count", &labels([("zone", "a")])),
            Err(MetricsError::UnknownLabel { .. })
        ));
    }

    #[test]
    fn redeclare_is_idempotent_but_not_reshapeable() {
        let r = registry();
        r.declare_family(FamilySpec::new(
            "tally_test_summary_count",
            "test family",
            ["node_name", "status"],
        ))
        .unwrap();
        assert!(matches!(
            r.declare_family(FamilySpec::new("tally_test_summary_count", "x", ["node_name"])),
            Err(MetricsError::Redeclared(_))
        ));
    }

    #[test]
    fn unknown_family_errors() {
        let r = PrometheusRegistry::new();
        assert!(matches!(
            r.set("nope", &LabelValues::new(), 1.0),
            Err(MetricsError::UnknownFamily(_))
        ));
    }
}

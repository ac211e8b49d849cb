use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Equality-based label selector (`key=value,key2=value2`).
///
/// An empty selector matches every object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector that matches everything.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Selector requiring a single label value.
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::everything().and(key, value)
    }

    /// Add another required label value.
    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl FromStr for LabelSelector {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut selector = Self::everything();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once('=')
                .ok_or_else(|| StoreError::InvalidSelector(s.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(StoreError::InvalidSelector(s.to_string()));
            }
            selector = selector.and(key, value.trim());
        }
        Ok(selector)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        f.write_str(&terms.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_all() {
        assert!(LabelSelector::everything().matches(&BTreeMap::new()));
        assert!(LabelSelector::everything().matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn eq_requires_exact_value() {
        let sel = LabelSelector::eq("tally.dev/shard-owner", "10.0.0.1");
        assert!(sel.matches(&labels(&[("tally.dev/shard-owner", "10.0.0.1")])));
        assert!(!sel.matches(&labels(&[("tally.dev/shard-owner", "10.0.0.2")])));
        assert!(!sel.matches(&BTreeMap::new()));
    }

    #[test]
    fn parse_and_display() {
        let sel: LabelSelector = "team=sec, env=prod".parse().unwrap();
        assert_eq!(sel.to_string(), "env=prod,team=sec");
        assert!(sel.matches(&labels(&[("env", "prod"), ("team", "sec"), ("x", "y")])));
        assert!("".parse::<LabelSelector>().unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_bare_keys() {
        assert!("team".parse::<LabelSelector>().is_err());
        assert!("=x".parse::<LabelSelector>().is_err());
    }
}

use std::collections::BTreeSet;

use tally_types::PeerAddress;

/// Membership change between two snapshots.
///
/// `added`, `kept` and `removed` are pairwise disjoint and together cover
/// `current ∪ previous`. Callers should treat them as sets; iteration order
/// carries no meaning.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerDiff {
    pub added: BTreeSet<PeerAddress>,
    pub kept: BTreeSet<PeerAddress>,
    pub removed: BTreeSet<PeerAddress>,
}

impl PeerDiff {
    /// Diff `current` against `previous`.
    ///
    /// With no previous snapshot (first observation) every current peer is
    /// reported as added.
    pub fn compute(
        current: &BTreeSet<PeerAddress>,
        previous: Option<&BTreeSet<PeerAddress>>,
    ) -> Self {
        let Some(previous) = previous else {
            return Self {
                added: current.clone(),
                ..Default::default()
            };
        };

        Self {
            added: current.difference(previous).cloned().collect(),
            kept: current.intersection(previous).cloned().collect(),
            removed: previous.difference(current).cloned().collect(),
        }
    }

    /// Peers present after the change: `added ∪ kept`.
    pub fn present(&self) -> BTreeSet<PeerAddress> {
        self.added.union(&self.kept).cloned().collect()
    }

    /// `true` when membership did not change.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(peers: &[&str]) -> BTreeSet<PeerAddress> {
        peers.iter().map(|p| PeerAddress::from(*p)).collect()
    }

    #[test]
    fn first_observation_adds_everything() {
        let current = set(&["1.2.3.4", "5.6.7.8"]);
        let diff = PeerDiff::compute(&current, None);
        assert_eq!(diff.added, current);
        assert!(diff.kept.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn one_peer_joins() {
        let diff = PeerDiff::compute(&set(&["1.2.3.4", "5.6.7.8"]), Some(&set(&["1.2.3.4"])));
        assert_eq!(diff.added, set(&["5.6.7.8"]));
        assert_eq!(diff.kept, set(&["1.2.3.4"]));
        assert!(diff.removed.is_empty());
        assert!(!diff.is_unchanged());
    }

    #[test]
    fn two_peers_leave() {
        let diff = PeerDiff::compute(
            &set(&["8.8.8.8", "1.2.3.4"]),
            Some(&set(&["8.8.8.8", "8.8.4.4", "1.2.3.4", "5.6.7.8"])),
        );
        assert!(diff.added.is_empty());
        assert_eq!(diff.kept, set(&["1.2.3.4", "8.8.8.8"]));
        assert_eq!(diff.removed, set(&["5.6.7.8", "8.8.4.4"]));
    }

    #[test]
    fn identical_snapshots_are_unchanged() {
        let s = set(&["a", "b"]);
        let diff = PeerDiff::compute(&s, Some(&s));
        assert!(diff.is_unchanged());
        assert_eq!(diff.present(), s);
    }

    #[test]
    fn empty_current_removes_all() {
        let diff = PeerDiff::compute(&BTreeSet::new(), Some(&set(&["a", "b"])));
        assert_eq!(diff.removed, set(&["a", "b"]));
        assert!(diff.present().is_empty());
    }

    fn peer_set() -> impl Strategy<Value = BTreeSet<PeerAddress>> {
        proptest::collection::btree_set("[a-f]{1,2}", 0..10)
            .prop_map(|s| s.into_iter().map(PeerAddress::new).collect())
    }

    proptest! {
        #[test]
        fn diff_partitions_the_union(current in peer_set(), previous in peer_set()) {
            let diff = PeerDiff::compute(&current, Some(&previous));

            let expected_added: BTreeSet<_> = current.difference(&previous).cloned().collect();
            let expected_kept: BTreeSet<_> = current.intersection(&previous).cloned().collect();
            let expected_removed: BTreeSet<_> = previous.difference(&current).cloned().collect();
            prop_assert_eq!(&diff.added, &expected_added);
            prop_assert_eq!(&diff.kept, &expected_kept);
            prop_assert_eq!(&diff.removed, &expected_removed);

            prop_assert!(diff.added.is_disjoint(&diff.kept));
            prop_assert!(diff.added.is_disjoint(&diff.removed));
            prop_assert!(diff.kept.is_disjoint(&diff.removed));

            let union: BTreeSet<_> = current.union(&previous).cloned().collect();
            let covered: BTreeSet<_> = diff
                .added
                .iter()
                .chain(&diff.kept)
                .chain(&diff.removed)
                .cloned()
                .collect();
            prop_assert_eq!(covered, union);
            prop_assert_eq!(diff.present(), current);
        }

        #[test]
        fn absent_previous_means_all_added(current in peer_set()) {
            let diff = PeerDiff::compute(&current, None);
            prop_assert_eq!(&diff.added, &current);
            prop_assert!(diff.kept.is_empty());
            prop_assert!(diff.removed.is_empty());
        }
    }
}

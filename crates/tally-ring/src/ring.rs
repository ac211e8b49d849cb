use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use tally_types::PeerAddress;

use crate::diff::PeerDiff;
use crate::error::{RingError, RingResult};
use crate::hasher::{Blake3Hasher, RingHasher};

/// Parameters of the bounded-load ring.
///
/// Every replica must run with identical values, otherwise they will disagree
/// about ownership.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Number of partitions keys are hashed into.
    pub partition_count: usize,
    /// Virtual nodes placed on the ring per member.
    pub replication_factor: usize,
    /// Upper bound on a member's partitions relative to the average.
    /// Must be at least 1.0.
    pub load: f64,
}

impl Default for RingConfig {
    fn default() -> Self {
        // Sized on the assumption that 97 exporters is a reasonable maximum.
        Self {
            partition_count: 97,
            replication_factor: 20,
            load: 1.25,
        }
    }
}

impl RingConfig {
    pub fn validate(&self) -> RingResult<()> {
        if self.partition_count == 0 {
            return Err(RingError::InvalidConfig(
                "partition_count must be positive".into(),
            ));
        }
        if self.replication_factor == 0 {
            return Err(RingError::InvalidConfig(
                "replication_factor must be positive".into(),
            ));
        }
        if !self.load.is_finite() || self.load < 1.0 {
            return Err(RingError::InvalidConfig(format!(
                "load must be >= 1.0, got {}",
                self.load
            )));
        }
        Ok(())
    }

    /// Maximum partitions any single member may hold.
    fn max_load(&self, members: usize) -> usize {
        ((self.partition_count as f64 / members as f64) * self.load).ceil() as usize
    }
}

/// Observable ring state, published on every membership change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingStatus {
    /// Incremented on every mutation that changed membership.
    pub generation: u64,
    pub members: usize,
}

/// Lock-protected ring contents. Everything here is derived from `members`.
#[derive(Default)]
struct RingState {
    members: BTreeSet<PeerAddress>,
    /// Virtual nodes sorted by hash.
    vnodes: Vec<(u64, PeerAddress)>,
    /// Owner of each partition, indexed by partition id. Empty iff no members.
    partitions: Vec<PeerAddress>,
    loads: BTreeMap<PeerAddress, usize>,
    generation: u64,
}

/// Thread-safe consistent-hashing membership table.
///
/// Keys are hashed into a fixed number of partitions; partitions are assigned
/// to members by walking a ring of virtual nodes, skipping members that have
/// already reached the load bound. The whole assignment is recomputed from
/// the member set on every change, so `locate_owner` is a pure function of
/// the current membership and the key.
///
/// Membership changes take the write lock; lookups take the read lock. The
/// lock is never held across I/O.
pub struct ShardRing {
    self_address: PeerAddress,
    config: RingConfig,
    hasher: Box<dyn RingHasher>,
    state: RwLock<RingState>,
    status: watch::Sender<RingStatus>,
}

impl ShardRing {
    /// Create an empty ring using BLAKE3 hashing.
    pub fn new(self_address: PeerAddress, config: RingConfig) -> RingResult<Self> {
        Self::with_hasher(self_address, config, Box::new(Blake3Hasher))
    }

    pub fn with_hasher(
        self_address: PeerAddress,
        config: RingConfig,
        hasher: Box<dyn RingHasher>,
    ) -> RingResult<Self> {
        config.validate()?;
        let (status, _) = watch::channel(RingStatus::default());
        Ok(Self {
            self_address,
            config,
            hasher,
            state: RwLock::new(RingState::default()),
            status,
        })
    }

    /// Address of the replica holding this ring.
    pub fn self_address(&self) -> &PeerAddress {
        &self.self_address
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Insert peers. Idempotent; returns how many were new.
    pub fn add_members<'a>(&self, peers: impl IntoIterator<Item = &'a PeerAddress>) -> usize {
        self.mutate(|members| {
            peers
                .into_iter()
                .filter(|p| members.insert((*p).clone()))
                .count()
        })
    }

    /// Remove peers. Idempotent; returns how many were present.
    pub fn remove_members<'a>(&self, peers: impl IntoIterator<Item = &'a PeerAddress>) -> usize {
        self.mutate(|members| peers.into_iter().filter(|p| members.remove(*p)).count())
    }

    /// Apply a diff under a single write lock: keep `added ∪ kept`, drop
    /// `removed`. Readers never observe the intermediate state.
    pub fn apply_diff(&self, diff: &PeerDiff) -> usize {
        self.mutate(|members| {
            let mut changed = 0;
            for peer in diff.added.iter().chain(diff.kept.iter()) {
                if members.insert(peer.clone()) {
                    changed += 1;
                }
            }
            for peer in &diff.removed {
                if members.remove(peer) {
                    changed += 1;
                }
            }
            changed
        })
    }

    /// The peer owning `key`, or `None` while the ring is empty.
    pub fn locate_owner(&self, key: &str) -> Option<PeerAddress> {
        let state = self.state.read().expect("ring lock poisoned");
        if state.partitions.is_empty() {
            return None;
        }
        let partition = self.partition_of(key);
        Some(state.partitions[partition].clone())
    }

    /// Whether `peer` owns `key` under the current membership.
    pub fn owned_by(&self, key: &str, peer: &PeerAddress) -> bool {
        self.locate_owner(key).as_ref() == Some(peer)
    }

    /// Whether this replica owns `key`. Always `false` on an empty ring.
    pub fn should_own(&self, key: &str) -> bool {
        self.owned_by(key, &self.self_address)
    }

    pub fn member_count(&self) -> usize {
        self.state.read().expect("ring lock poisoned").members.len()
    }

    /// Current members in address order.
    pub fn members(&self) -> BTreeSet<PeerAddress> {
        self.state.read().expect("ring lock poisoned").members.clone()
    }

    /// Partitions held by each member.
    pub fn loads(&self) -> BTreeMap<PeerAddress, usize> {
        self.state.read().expect("ring lock poisoned").loads.clone()
    }

    pub fn status(&self) -> RingStatus {
        *self.status.borrow()
    }

    /// Receive a [`RingStatus`] every time membership changes.
    pub fn subscribe(&self) -> watch::Receiver<RingStatus> {
        self.status.subscribe()
    }

    /// Wait until the ring has at least one member, for at most `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> RingResult<usize> {
        let mut rx = self.status.subscribe();
        let ready = tokio::time::timeout(timeout, rx.wait_for(|s| s.members > 0)).await;
        match ready {
            Ok(Ok(status)) => Ok(status.members),
            // The sender lives as long as the ring, so a closed channel
            // cannot happen while we hold `&self`.
            Ok(Err(_)) => Err(RingError::ChannelClosed),
            Err(_) => Err(RingError::NotReady(timeout)),
        }
    }

    fn partition_of(&self, key: &str) -> usize {
        (self.hasher.sum64(key.as_bytes()) % self.config.partition_count as u64) as usize
    }

    /// Run `f` against the member set; rebuild and publish if anything changed.
    fn mutate(&self, f: impl FnOnce(&mut BTreeSet<PeerAddress>) -> usize) -> usize {
        let (changed, status) = {
            let mut state = self.state.write().expect("ring lock poisoned");
            let changed = f(&mut state.members);
            if changed == 0 {
                return 0;
            }
            self.rebuild(&mut state);
            state.generation += 1;
            debug!(
                generation = state.generation,
                members = state.members.len(),
                changed,
                "ring rebuilt"
            );
            (
                changed,
                RingStatus {
                    generation: state.generation,
                    members: state.members.len(),
                },
            )
        };
        self.status.send_replace(status);
        changed
    }

    fn rebuild(&self, state: &mut RingState) {
        let mut vnodes = Vec::with_capacity(state.members.len() * self.config.replication_factor);
        for member in &state.members {
            for i in 0..self.config.replication_factor {
                let label = format!("{member}{i}");
                vnodes.push((self.hasher.sum64(label.as_bytes()), member.clone()));
            }
        }
        // On a hash collision the smaller address wins, independent of
        // insertion history.
        vnodes.sort();
        vnodes.dedup_by(|later, earlier| later.0 == earlier.0);
        state.vnodes = vnodes;
        self.distribute(state);
    }

    fn distribute(&self, state: &mut RingState) {
        let mut loads: BTreeMap<PeerAddress, usize> = BTreeMap::new();
        let mut partitions = Vec::new();

        if !state.vnodes.is_empty() {
            let max_load = self.config.max_load(state.members.len());
            let ring = &state.vnodes;
            partitions.reserve(self.config.partition_count);

            for partition in 0..self.config.partition_count {
                let h = self.hasher.sum64(&(partition as u64).to_le_bytes());
                let start = ring.partition_point(|(v, _)| *v < h) % ring.len();

                let owner = (0..ring.len())
                    .map(|step| &ring[(start + step) % ring.len()].1)
                    .find(|member| loads.get(*member).copied().unwrap_or(0) < max_load)
                    // Unreachable with load >= 1.0; fall back to the first candidate.
                    .unwrap_or(&ring[start].1)
                    .clone();

                *loads.entry(owner.clone()).or_insert(0) += 1;
                partitions.push(owner);
            }
        }

        state.partitions = partitions;
        state.loads = loads;
    }
}

impl std::fmt::Debug for ShardRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRing")
            .field("self_address", &self.self_address)
            .field("members", &self.member_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn peer(s: &str) -> PeerAddress {
        PeerAddress::from(s)
    }

    fn ring_with(self_addr: &str, members: &[&str]) -> ShardRing {
        let ring = ShardRing::new(peer(self_addr), RingConfig::default()).unwrap();
        let peers: Vec<PeerAddress> = members.iter().map(|m| peer(m)).collect();
        ring.add_members(&peers);
        ring
    }

    #[test]
    fn single_member_owns_everything() {
        let ring = ring_with("10.0.0.1", &["10.0.0.1"]);
        assert_eq!(ring.locate_owner("ns/report-1"), Some(peer("10.0.0.1")));
        assert!(ring.should_own("ns/report-1"));
        assert!(!ring.owned_by("ns/report-1", &peer("10.0.0.2")));
    }

    #[test]
    fn empty_ring_owns_nothing() {
        let ring = ShardRing::new(peer("10.0.0.1"), RingConfig::default()).unwrap();
        assert_eq!(ring.locate_owner("ns/report-1"), None);
        assert!(!ring.should_own("ns/report-1"));
        assert_eq!(ring.member_count(), 0);
    }

    #[test]
    fn two_rings_agree() {
        let members = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"];
        let a = ring_with("10.0.0.1", &members);
        let b = ring_with("10.0.0.3", &members);
        for i in 0..500 {
            let key = format!("ns-{}/report-{i}", i % 7);
            assert_eq!(a.locate_owner(&key), b.locate_owner(&key));
        }
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = ring_with("x", &["c", "a", "b"]);
        let b = ShardRing::new(peer("x"), RingConfig::default()).unwrap();
        b.add_members(&[peer("b")]);
        b.add_members(&[peer("a"), peer("c")]);
        for i in 0..200 {
            let key = format!("report-{i}");
            assert_eq!(a.locate_owner(&key), b.locate_owner(&key));
        }
    }

    #[test]
    fn loads_are_bounded() {
        let members: Vec<String> = (1..=7).map(|i| format!("10.0.0.{i}")).collect();
        let refs: Vec<&str> = members.iter().map(String::as_str).collect();
        let ring = ring_with("10.0.0.1", &refs);

        let cfg = RingConfig::default();
        let max = cfg.max_load(members.len());
        let loads = ring.loads();
        assert_eq!(loads.values().sum::<usize>(), cfg.partition_count);
        assert!(loads.values().all(|l| *l <= max), "loads {loads:?} exceed {max}");
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let ring = ring_with("a", &["a", "b"]);
        let gen = ring.status().generation;
        assert_eq!(ring.add_members(&[peer("a"), peer("b")]), 0);
        assert_eq!(ring.status().generation, gen);

        assert_eq!(ring.remove_members(&[peer("b")]), 1);
        assert_eq!(ring.remove_members(&[peer("b")]), 0);
        assert_eq!(ring.member_count(), 1);
    }

    #[test]
    fn removing_last_member_empties_ring() {
        let ring = ring_with("a", &["a"]);
        ring.remove_members(&[peer("a")]);
        assert_eq!(ring.locate_owner("k"), None);
        assert!(ring.loads().is_empty());
    }

    #[test]
    fn apply_diff_updates_in_one_generation() {
        let ring = ring_with("a", &["a", "b"]);
        let before = ring.status().generation;
        let diff = PeerDiff::compute(
            &[peer("a"), peer("c")].into_iter().collect(),
            Some(&[peer("a"), peer("b")].into_iter().collect()),
        );
        assert_eq!(ring.apply_diff(&diff), 2);
        assert_eq!(ring.status().generation, before + 1);
        assert_eq!(
            ring.members(),
            [peer("a"), peer("c")].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn rejects_bad_config() {
        let bad = RingConfig {
            load: 0.9,
            ..Default::default()
        };
        assert!(matches!(
            ShardRing::new(peer("a"), bad),
            Err(RingError::InvalidConfig(_))
        ));
        let zero = RingConfig {
            partition_count: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[tokio::test]
    async fn wait_ready_resolves_after_first_member() {
        let ring = std::sync::Arc::new(ShardRing::new(peer("a"), RingConfig::default()).unwrap());
        let writer = std::sync::Arc::clone(&ring);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.add_members(&[peer("a"), peer("b")]);
        });
        let members = ring.wait_ready(Duration::from_secs(5)).await.unwrap();
        assert_eq!(members, 2);
    }

    #[tokio::test]
    async fn wait_ready_times_out_on_empty_ring() {
        let ring = ShardRing::new(peer("a"), RingConfig::default()).unwrap();
        let err = ring.wait_ready(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, RingError::NotReady(_)));
    }

    proptest! {
        #[test]
        fn exactly_one_owner_across_replicas(
            members in proptest::collection::btree_set("[0-9]{1,3}\\.[0-9]{1,3}", 1..8),
            key in "[a-z0-9/-]{1,24}",
        ) {
            let members: Vec<PeerAddress> = members.into_iter().map(PeerAddress::new).collect();
            let owners = members
                .iter()
                .filter(|me| {
                    let ring = ShardRing::new((*me).clone(), RingConfig::default()).unwrap();
                    ring.add_members(&members);
                    ring.should_own(&key)
                })
                .count();
            prop_assert_eq!(owners, 1);
        }

        #[test]
        fn repeated_adds_leave_same_assignment(
            members in proptest::collection::btree_set("[a-z]{1,6}", 1..6),
        ) {
            let members: Vec<PeerAddress> = members.into_iter().map(PeerAddress::new).collect();
            let once = ShardRing::new(PeerAddress::new("self"), RingConfig::default()).unwrap();
            once.add_members(&members);
            let twice = ShardRing::new(PeerAddress::new("self"), RingConfig::default()).unwrap();
            twice.add_members(&members);
            twice.add_members(&members);
            prop_assert_eq!(once.loads(), twice.loads());
            prop_assert_eq!(once.members(), twice.members());
        }
    }
}

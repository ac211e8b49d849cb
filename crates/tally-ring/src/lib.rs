//! Shard ownership for tally.
//!
//! Every exporter replica holds its own [`ShardRing`] and feeds it the same
//! membership stream. Because ring lookups are a pure function of the member
//! set, all replicas agree on which peer owns a report without talking to
//! each other.
//!
//! # Pieces
//!
//! - [`RingHasher`] / [`Blake3Hasher`]: stable 64-bit key hashing
//! - [`ShardRing`]: bounded-load consistent hashing over peer addresses
//! - [`PeerDiff`]: added/kept/removed between two membership snapshots
//! - [`MembershipEvent`] and [`MembershipSource`]: where snapshots come from
//! - [`PeerWatcher`]: applies membership events to the ring

pub mod diff;
pub mod error;
pub mod hasher;
pub mod membership;
pub mod ring;
pub mod source;
pub mod watcher;

pub use diff::PeerDiff;
pub use error::{RingError, RingResult};
pub use hasher::{Blake3Hasher, RingHasher};
pub use membership::{decode_endpoints, encode_endpoints, MembershipEvent, MembershipSnapshot};
pub use ring::{RingConfig, RingStatus, ShardRing};
pub use source::{EndpointsFileSource, MembershipSource, StaticMembership};
pub use watcher::PeerWatcher;

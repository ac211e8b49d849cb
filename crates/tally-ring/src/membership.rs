//! Membership events and endpoint decoding.
//!
//! Sources hand the watcher raw endpoint objects, the same shape a service's
//! endpoints resource has:
//!
//! ```json
//! { "subsets": [ { "addresses": [ { "ip": "10.0.0.1" }, { "ip": "10.0.0.2" } ] } ] }
//! ```
//!
//! Decoding happens in the watcher so that a malformed object is dropped in
//! one place, leaving the ring untouched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tally_types::PeerAddress;

use crate::error::{RingError, RingResult};

/// The complete set of replicas known at one point in time.
pub type MembershipSnapshot = BTreeSet<PeerAddress>;

/// One update from a membership source.
///
/// Every event carries the full current membership; sources never compute
/// diffs themselves.
#[derive(Clone, Debug, PartialEq)]
pub enum MembershipEvent {
    /// First observation of the endpoints object (or a re-list).
    Added { current: Value },
    /// The endpoints object changed from `previous` to `current`.
    Updated { previous: Value, current: Value },
}

impl MembershipEvent {
    pub fn current(&self) -> &Value {
        match self {
            Self::Added { current } | Self::Updated { current, .. } => current,
        }
    }

    pub fn previous(&self) -> Option<&Value> {
        match self {
            Self::Added { .. } => None,
            Self::Updated { previous, .. } => Some(previous),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Endpoints {
    #[serde(default)]
    subsets: Vec<EndpointSubset>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EndpointSubset {
    #[serde(default)]
    addresses: Vec<EndpointAddress>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EndpointAddress {
    ip: String,
}

/// Decode an endpoints object into the set of peer addresses it lists.
pub fn decode_endpoints(value: &Value) -> RingResult<MembershipSnapshot> {
    let endpoints = Endpoints::deserialize(value).map_err(|e| RingError::Decode(e.to_string()))?;
    endpoints
        .subsets
        .iter()
        .flat_map(|subset| subset.addresses.iter())
        .map(|addr| {
            addr.ip
                .parse::<PeerAddress>()
                .map_err(|e| RingError::Decode(e.to_string()))
        })
        .collect()
}

/// Build an endpoints object listing `peers` in a single subset.
pub fn encode_endpoints<'a>(peers: impl IntoIterator<Item = &'a PeerAddress>) -> Value {
    let endpoints = Endpoints {
        subsets: vec![EndpointSubset {
            addresses: peers
                .into_iter()
                .map(|p| EndpointAddress {
                    ip: p.as_str().to_string(),
                })
                .collect(),
        }],
    };
    serde_json::to_value(endpoints).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_flattens_subsets() {
        let value = json!({
            "subsets": [
                { "addresses": [ { "ip": "10.0.131.187", "nodeName": "worker-26" } ] },
                { "addresses": [ { "ip": "10.0.133.125" }, { "ip": "10.0.131.187" } ] }
            ]
        });
        let peers = decode_endpoints(&value).unwrap();
        assert_eq!(peers.len(), 2);
        assert!(peers.contains(&PeerAddress::from("10.0.133.125")));
    }

    #[test]
    fn decode_empty_object_is_empty_set() {
        assert!(decode_endpoints(&json!({})).unwrap().is_empty());
        assert!(decode_endpoints(&json!({ "subsets": [ {} ] })).unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        assert!(matches!(
            decode_endpoints(&json!({ "subsets": "nope" })),
            Err(RingError::Decode(_))
        ));
        assert!(decode_endpoints(&json!([1, 2, 3])).is_err());
        assert!(decode_endpoints(&json!({ "subsets": [ { "addresses": [ { "ip": "" } ] } ] })).is_err());
    }

    #[test]
    fn encode_then_decode_lists_same_peers() {
        let peers: MembershipSnapshot =
            ["1.2.3.4", "5.6.7.8"].iter().map(|p| PeerAddress::from(*p)).collect();
        let decoded = decode_endpoints(&encode_endpoints(&peers)).unwrap();
        assert_eq!(decoded, peers);
    }

    #[test]
    fn event_accessors() {
        let e = MembershipEvent::Updated {
            previous: json!({}),
            current: json!({ "subsets": [] }),
        };
        assert!(e.previous().is_some());
        assert_eq!(e.current(), &json!({ "subsets": [] }));
        assert!(MembershipEvent::Added { current: json!({}) }.previous().is_none());
    }
}

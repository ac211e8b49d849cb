use thiserror::Error;

/// Errors produced by type parsing and validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid peer address {0:?}: must be non-empty and contain no whitespace")]
    InvalidPeerAddress(String),

    #[error("invalid object key {0:?}: expected `name` or `namespace/name`")]
    InvalidObjectKey(String),

    #[error("unknown resource kind: {0}")]
    UnknownKind(String),
}

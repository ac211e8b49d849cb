use std::time::Duration;

/// Errors produced by the ring and membership subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// A membership event could not be decoded into a set of peers.
    #[error("cannot decode membership event: {0}")]
    Decode(String),

    /// Ring parameters are unusable.
    #[error("invalid ring configuration: {0}")]
    InvalidConfig(String),

    /// The ring stayed empty for longer than the readiness timeout.
    #[error("ring has no members after {0:?}")]
    NotReady(Duration),

    /// The consumer side of a membership channel went away.
    #[error("membership channel closed")]
    ChannelClosed,

    /// I/O error while reading a membership source.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the ring crate.
pub type RingResult<T> = std::result::Result<T, RingError>;

use tally_types::{ObjectKey, ResourceKind};

/// Errors from resource store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write targeted an object that does not exist.
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    /// Create targeted an object that already exists.
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: ResourceKind, key: ObjectKey },

    /// Optimistic concurrency check failed.
    #[error("conflict on {key}: update based on version {expected}, stored version is {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    /// The key cannot be mapped onto the backend's storage layout.
    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    /// A label selector string could not be parsed.
    #[error("invalid label selector {0:?}")]
    InvalidSelector(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend is temporarily unable to serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Io(_) | Self::Unavailable(_)
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

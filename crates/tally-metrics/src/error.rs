/// Errors from metric registration, publishing, and label selection.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// A family was used before it was declared.
    #[error("metric family {0:?} is not declared")]
    UnknownFamily(String),

    /// A family was declared twice with different label names.
    #[error("metric family {0:?} already declared with different labels")]
    Redeclared(String),

    /// A label name is not part of the family or the schema.
    #[error("unknown label {label:?} for {context}")]
    UnknownLabel { label: String, context: String },

    /// A label group name is not defined by the schema.
    #[error("unknown label group {0:?}")]
    UnknownGroup(String),

    /// A series was set without a value for every label of its family.
    #[error("series for {family:?} is missing label {label:?}")]
    MissingLabel { family: String, label: String },

    /// Error reported by the Prometheus client.
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Text exposition produced invalid UTF-8.
    #[error("metric encoding failed: {0}")]
    Encoding(String),
}

/// Result alias for metric operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

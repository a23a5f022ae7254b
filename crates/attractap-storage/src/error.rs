use thiserror::Error;

/// Storage-specific error types for the reader's persisted preferences.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing a backing file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file is not valid JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Namespace name cannot be used as a storage key
    #[error("Invalid namespace: {0:?}")]
    InvalidNamespace(String),

    /// Stored value does not parse as the expected type
    #[error("Invalid value for {namespace}.{key}: {value:?}")]
    InvalidValue {
        namespace: String,
        key: String,
        value: String,
    },

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn invalid_value(namespace: &str, key: &str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

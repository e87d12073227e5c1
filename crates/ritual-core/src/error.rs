//! Error types for ritual-core

use thiserror::Error;

/// Result type alias using ritual-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the manifest model, the storage ports and the archive pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument or configuration value is missing or malformed
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A storage or transport operation failed
    #[error("{operation} failed for {key}: {source}")]
    Transport {
        operation: &'static str,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Storage key does not exist
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// Path resolves outside of its confinement root
    #[error("Path traversal detected: {path}")]
    PathTraversal { path: String },

    /// Extraction target already exists and the conflict strategy forbids overwriting
    #[error("File already exists: {path}")]
    AlreadyExists { path: String },

    /// Timestamp could not be parsed
    #[error("Invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    /// Internal postcondition violated
    #[error("Consistency check failed: {message}")]
    Consistency { message: String },

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Local filesystem error
    #[error("IO error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Wrap a failure of a storage/transport operation on `key`
    pub fn transport<E>(operation: &'static str, key: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Transport {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a path traversal error
    pub fn path_traversal(path: impl Into<String>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Create an already exists error
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Create an invalid timestamp error
    pub fn invalid_timestamp(value: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
        }
    }

    /// Create a consistency error
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Wrap an IO error with the path or operation it came from
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns true if the error is a missing key
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

//! Error types for the ORM system
//!
//! Provides error handling for database operations, relationship
//! resolution, and query building.

use std::fmt;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone)]
pub enum ModelError {
    /// Database connection or query error
    Database(String),
    /// Argument validation failed
    Validation(String),
    /// A record is missing a key attribute required by an operation
    MissingKey(String),
    /// Serialization/deserialization error
    Serialization(String),
    /// Connection pool error
    Connection(String),
    /// Query building or evaluation error
    Query(String),
    /// Configuration error
    Configuration(String),
    /// Operation not supported by a relation kind
    UnsupportedOperation {
        /// Relation that declined the operation
        relation: String,
        /// Name of the declined operation
        operation: String,
    },
}

impl ModelError {
    /// Build the capability signal a relation returns when it cannot
    /// perform an operation.
    pub fn unsupported(relation: impl Into<String>, operation: impl Into<String>) -> Self {
        ModelError::UnsupportedOperation {
            relation: relation.into(),
            operation: operation.into(),
        }
    }

    /// True when this error is the capability signal rather than a failure.
    ///
    /// Aggregated relations skip a member on this error and propagate
    /// every other kind.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ModelError::UnsupportedOperation { .. })
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Database(msg) => write!(f, "Database error: {}", msg),
            ModelError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ModelError::MissingKey(msg) => write!(f, "Missing key: {}", msg),
            ModelError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ModelError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ModelError::Query(msg) => write!(f, "Query error: {}", msg),
            ModelError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ModelError::UnsupportedOperation {
                relation,
                operation,
            } => write!(
                f,
                "Operation '{}' is not supported by relation '{}'",
                operation, relation
            ),
        }
    }
}

impl std::error::Error for ModelError {}

// Convert from sqlx errors
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        ModelError::Database(err.to_string())
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

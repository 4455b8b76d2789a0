//! Error Types for Keystone Repositories
//!
//! [`RepoError`] is the only error a repository method returns. Identifier,
//! value and validation failures are raised before any I/O. Query failures
//! carry the resource, operation and actor they happened under.

use keystone_core::{ConfigError, QueryError, Resource, SanitizeError, ValidationError};
use thiserror::Error;

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Failures while assembling the data layer or its Postgres adapters.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Repository setup failed: {0}")]
    Repository(#[from] RepoError),

    #[error("Database pool error: {reason}")]
    Pool { reason: String },

    #[error("Schema setup failed: {reason}")]
    Schema { reason: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RepoError {
    #[error("Invalid identifier `{identifier}`: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Unsupported value type: {type_name}")]
    UnsupportedValueType { type_name: String },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(
        "Rate limit exceeded for {operation} on {resource} by {actor_id} \
         ({limit} per {window_ms}ms)"
    )]
    RateLimitExceeded {
        resource: Resource,
        operation: String,
        actor_id: String,
        limit: u32,
        window_ms: i64,
    },

    #[error("{resource} {id} not found")]
    NotFound { resource: Resource, id: String },

    #[error("Query {operation} on {resource} failed for {actor_id}: {source}")]
    QueryExecution {
        resource: Resource,
        operation: String,
        actor_id: String,
        #[source]
        source: QueryError,
    },
}

impl From<SanitizeError> for RepoError {
    fn from(err: SanitizeError) -> Self {
        match err {
            SanitizeError::InvalidIdentifier { identifier, reason } => {
                RepoError::InvalidIdentifier { identifier, reason }
            }
            SanitizeError::UnsupportedValueType { type_name } => {
                RepoError::UnsupportedValueType { type_name }
            }
        }
    }
}

impl RepoError {
    /// Stable error code, recorded in audit details.
    pub fn code(&self) -> &'static str {
        match self {
            RepoError::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            RepoError::UnsupportedValueType { .. } => "UNSUPPORTED_VALUE_TYPE",
            RepoError::Validation(_) => "VALIDATION_FAILED",
            RepoError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            RepoError::NotFound { .. } => "NOT_FOUND",
            RepoError::QueryExecution { source, .. } => match source {
                QueryError::Connection { .. } => "QUERY_CONNECTION",
                QueryError::Timeout { .. } => "QUERY_TIMEOUT",
                QueryError::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
                QueryError::Mapping { .. } => "ROW_MAPPING",
                QueryError::Execution { .. } | QueryError::Unsupported { .. } => {
                    "QUERY_EXECUTION"
                }
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RepoError::RateLimitExceeded { .. })
    }
}

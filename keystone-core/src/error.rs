//! Error types for Keystone operations

use thiserror::Error;

/// Errors raised while preparing identifiers or literals for query text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("Invalid identifier `{identifier}`: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Unsupported value type for SQL literal: {type_name}")]
    UnsupportedValueType { type_name: String },
}

impl SanitizeError {
    pub(crate) fn invalid_identifier(identifier: &str, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }
}

/// Input validation errors. Raised before any I/O.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Value for {field} out of range [{min}, {max}]")]
    OutOfRange { field: String, min: i64, max: i64 },

    #[error("Update contains no fields")]
    NoUpdates,
}

impl ValidationError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// A stored string did not match any variant of a closed enum.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown {enum_name} value `{value}`")]
pub struct UnknownVariant {
    pub enum_name: &'static str,
    pub value: String,
}

/// Cache failures. Always non-fatal: callers treat them as a miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache namespace {namespace} lock poisoned")]
    LockPoisoned { namespace: String },

    #[error("Cache entry {key} in {namespace} could not be (de)serialized: {reason}")]
    Serialization {
        namespace: String,
        key: String,
        reason: String,
    },
}

/// Rate-limit backing store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CounterStoreError {
    #[error("Counter store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Counter store timed out: {reason}")]
    Timeout { reason: String },

    #[error("Invalid key pattern `{pattern}`")]
    InvalidPattern { pattern: String },
}

/// Query executor failures, propagated unchanged from the collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    #[error("Execution failed: {reason}")]
    Execution { reason: String },

    #[error("Query timed out: {reason}")]
    Timeout { reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },

    #[error("Row mapping failed on column {column}: {reason}")]
    Mapping { column: String, reason: String },

    #[error("Unsupported statement: {reason}")]
    Unsupported { reason: String },
}

impl QueryError {
    pub fn mapping(column: &str, reason: impl Into<String>) -> Self {
        Self::Mapping {
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

/// Audit sink failures. Reported separately, never surfaced to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuditError {
    #[error("Audit sink unavailable: {reason}")]
    SinkUnavailable { reason: String },

    #[error("Audit event serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Audit sink lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_error_display_invalid_identifier() {
        let err = SanitizeError::invalid_identifier("users;--", "contains characters outside [A-Za-z0-9_]");
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid identifier"));
        assert!(msg.contains("users;--"));
    }

    #[test]
    fn test_validation_error_display_out_of_range() {
        let err = ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: 100,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("limit"));
        assert!(msg.contains("[1, 100]"));
    }

    #[test]
    fn test_query_error_display_mapping() {
        let err = QueryError::mapping("price_cents", "expected integer");
        let msg = format!("{}", err);
        assert!(msg.contains("price_cents"));
        assert!(msg.contains("expected integer"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "KEYSTONE_CACHE_TTL_SECS".to_string(),
            value: "soon".to_string(),
            reason: "must be an integer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("KEYSTONE_CACHE_TTL_SECS"));
        assert!(msg.contains("soon"));
        assert!(msg.contains("must be an integer"));
    }

    #[test]
    fn test_unknown_variant_display() {
        let err = UnknownVariant {
            enum_name: "UnitStatus",
            value: "demolished".to_string(),
        };
        assert_eq!(format!("{}", err), "Unknown UnitStatus value `demolished`");
    }
}

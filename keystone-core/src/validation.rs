//! Input validation.
//!
//! Every repository input is a typed struct with an explicit
//! [`Validate::validate`] step. The helper traits below keep the individual
//! field checks uniform.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest accepted entity id.
pub const MAX_ID_LEN: usize = 64;

/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Page size used when the caller does not choose one.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

static ID_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$"));

static EMAIL_PATTERN: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"));

fn matches(pattern: &Lazy<Result<Regex, regex::Error>>, value: &str) -> bool {
    match pattern.as_ref() {
        Ok(regex) => regex.is_match(value),
        Err(_) => false,
    }
}

/// Typed input that can check its own shape.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Trait for validating non-empty strings.
pub trait ValidateNonEmpty {
    /// Returns `RequiredFieldMissing` if the value is empty or whitespace-only.
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        if self.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: field_name.to_string(),
            });
        }
        Ok(())
    }
}

impl ValidateNonEmpty for &str {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        (*self).validate_non_empty(field_name)
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        self.as_str().validate_non_empty(field_name)
    }
}

impl<T: ValidateNonEmpty> ValidateNonEmpty for Option<T> {
    fn validate_non_empty(&self, field_name: &str) -> Result<(), ValidationError> {
        match self {
            Some(value) => value.validate_non_empty(field_name),
            None => Err(ValidationError::RequiredFieldMissing {
                field: field_name.to_string(),
            }),
        }
    }
}

/// Trait for validating numeric ranges.
pub trait ValidateRange {
    /// Validate that the value is positive (> 0).
    fn validate_positive(&self, field_name: &str) -> Result<(), ValidationError>;

    /// Validate that the value is within an inclusive range.
    fn validate_range(&self, field_name: &str, min: Self, max: Self) -> Result<(), ValidationError>
    where
        Self: Sized;
}

macro_rules! impl_validate_range {
    ($($t:ty),*) => {
        $(
            impl ValidateRange for $t {
                fn validate_positive(&self, field_name: &str) -> Result<(), ValidationError> {
                    if *self <= 0 as $t {
                        return Err(ValidationError::OutOfRange {
                            field: field_name.to_string(),
                            min: 1,
                            max: i64::try_from(<$t>::MAX).unwrap_or(i64::MAX),
                        });
                    }
                    Ok(())
                }

                fn validate_range(&self, field_name: &str, min: Self, max: Self) -> Result<(), ValidationError> {
                    if *self < min || *self > max {
                        return Err(ValidationError::OutOfRange {
                            field: field_name.to_string(),
                            min: i64::try_from(min).unwrap_or(i64::MIN),
                            max: i64::try_from(max).unwrap_or(i64::MAX),
                        });
                    }
                    Ok(())
                }
            }
        )*
    };
}

impl_validate_range!(i32, i64, u32, u64);

/// Trait for checking if an update payload has any fields set.
pub trait HasUpdates {
    /// Check if any update fields are set.
    fn has_any_updates(&self) -> bool;

    /// Validate that at least one update field is set.
    fn validate_has_updates(&self) -> Result<(), ValidationError> {
        if !self.has_any_updates() {
            return Err(ValidationError::NoUpdates);
        }
        Ok(())
    }
}

/// Validate the format of an opaque entity id.
pub fn validate_entity_id(field: &str, id: &str) -> Result<(), ValidationError> {
    id.validate_non_empty(field)?;
    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::invalid(
            field,
            format!("must be at most {MAX_ID_LEN} characters"),
        ));
    }
    if !matches(&ID_PATTERN, id) {
        return Err(ValidationError::invalid(
            field,
            "may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}

/// Validate an email address (shape only).
pub fn validate_email(field: &str, email: &str) -> Result<(), ValidationError> {
    email.validate_non_empty(field)?;
    if email.len() > 254 || !matches(&EMAIL_PATTERN, email) {
        return Err(ValidationError::invalid(field, "is not a valid email address"));
    }
    Ok(())
}

/// Validate a free-text field: present and bounded.
pub fn validate_text(field: &str, value: &str, max_len: usize) -> Result<(), ValidationError> {
    value.validate_non_empty(field)?;
    if value.chars().count() > max_len {
        return Err(ValidationError::invalid(
            field,
            format!("must be at most {max_len} characters"),
        ));
    }
    Ok(())
}

/// Validate a finite, strictly positive float no larger than `max`.
pub fn validate_positive_f64(field: &str, value: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value <= 0.0 || value > max {
        return Err(ValidationError::invalid(
            field,
            format!("must be a finite number in (0, {max}]"),
        ));
    }
    Ok(())
}

// ============================================================================
// PAGINATION
// ============================================================================

/// Page request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Rows to skip: `(page - 1) * limit`.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Number of pages needed for `total` rows.
    pub fn total_pages(&self, total: u64) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        total.div_ceil(u64::from(self.limit))
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Validate for Pagination {
    fn validate(&self) -> Result<(), ValidationError> {
        self.page.validate_range("page", 1, u32::MAX)?;
        self.limit.validate_range("limit", 1, MAX_PAGE_LIMIT)?;
        Ok(())
    }
}

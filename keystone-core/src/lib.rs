//! Keystone Core - Shared Types
//!
//! Entities, typed inputs, the error taxonomy, identifier sanitization and
//! validation. Every other Keystone crate depends on this one; nothing here
//! performs I/O.

pub mod clock;
pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod inputs;
pub mod sanitize;
pub mod validation;
pub mod value;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RateLimit, RateLimitPolicy};
pub use entities::{
    CustomizationOption, Development, Document, FinanceRecord, Page, Room, Sale, Unit, User,
};
pub use enums::{
    AuditStatus, CacheNamespace, DevelopmentStatus, DocumentKind, FinanceRecordType, Operation,
    PaymentStatus, Resource, SaleStatus, UnitStatus, UnitType, UserRole,
};
pub use error::{
    AuditError, CacheError, ConfigError, CounterStoreError, QueryError, SanitizeError,
    UnknownVariant, ValidationError,
};
pub use identity::{new_entity_id, truncate_to_micros, ActorId, DurationMs, EntityId, Timestamp};
pub use inputs::{
    DevelopmentPatch, DocumentPatch, FinanceRecordPatch, NewDevelopment, NewDocument,
    NewFinanceRecord, NewSale, NewUnit, NewUser, SalePatch, UnitFilter, UnitPatch, UserPatch,
};
pub use sanitize::{sanitize_identifier, sanitize_query_text, sanitize_value, MAX_IDENTIFIER_LEN};
pub use validation::{
    validate_email, validate_entity_id, validate_positive_f64, validate_text, HasUpdates,
    Pagination, Validate, ValidateNonEmpty, ValidateRange, DEFAULT_PAGE_LIMIT, MAX_ID_LEN,
    MAX_PAGE_LIMIT,
};
pub use value::{Row, SqlValue};

//! Row mapping contract.
//!
//! A mapper is a zero-sized type tying an entity to its table: the column
//! allow-list, the default ordering, and conversions between [`Row`]s and
//! entities. The repository engine is generic over it.

use chrono::{DateTime, Utc};
use keystone_core::{EntityId, QueryError, Resource, Row, Timestamp, UnknownVariant, Validate};
use keystone_storage::{Record, SortOrder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Newest first, ties broken by id.
pub const NEWEST_FIRST: &[(&str, SortOrder)] =
    &[("created_at", SortOrder::Desc), ("id", SortOrder::Asc)];

/// Read-side mapping between rows and entities.
pub trait RowMapper: Send + Sync + 'static {
    type Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Table this mapper reads.
    const RESOURCE: Resource;

    /// Every column that may appear in query text for this table.
    const COLUMNS: &'static [&'static str];

    /// Ordering applied to listings.
    const ORDER_BY: &'static [(&'static str, SortOrder)];

    fn map_to_entity(row: &Row) -> Result<Self::Entity, QueryError>;

    fn map_to_record(entity: &Self::Entity) -> Record;
}

/// Write-side mapping for tables the layer creates, updates and deletes.
pub trait EntityMapper: RowMapper {
    /// Validated input for `create`.
    type Draft: Validate + Send + Sync;

    /// Validated partial update.
    type Patch: Validate + Send + Sync;

    fn entity_id(entity: &Self::Entity) -> &str;

    /// Materialize a draft with a freshly minted id and timestamps.
    fn build(draft: Self::Draft, id: EntityId, now: Timestamp) -> Self::Entity;

    /// Columns changed by a patch. `updated_at` is added by the engine.
    fn patch_record(patch: &Self::Patch) -> Record;
}

// ============================================================================
// ROW ACCESSORS
// ============================================================================

fn field<'r>(row: &'r Row, column: &str) -> Result<&'r JsonValue, QueryError> {
    row.get(column)
        .ok_or_else(|| QueryError::mapping(column, "column missing from row"))
}

fn nullable<'r>(row: &'r Row, column: &str) -> Option<&'r JsonValue> {
    row.get(column).filter(|value| !value.is_null())
}

pub fn get_str(row: &Row, column: &str) -> Result<String, QueryError> {
    field(row, column)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| QueryError::mapping(column, "expected text"))
}

pub fn get_opt_str(row: &Row, column: &str) -> Result<Option<String>, QueryError> {
    nullable(row, column)
        .map(|value| {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| QueryError::mapping(column, "expected text or null"))
        })
        .transpose()
}

pub fn get_i64(row: &Row, column: &str) -> Result<i64, QueryError> {
    let value = field(row, column)?;
    value
        .as_i64()
        // NUMERIC columns arrive as strings from some drivers.
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| QueryError::mapping(column, "expected integer"))
}

pub fn get_f64(row: &Row, column: &str) -> Result<f64, QueryError> {
    let value = field(row, column)?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| QueryError::mapping(column, "expected number"))
}

pub fn get_bool(row: &Row, column: &str) -> Result<bool, QueryError> {
    field(row, column)?
        .as_bool()
        .ok_or_else(|| QueryError::mapping(column, "expected boolean"))
}

fn parse_timestamp(column: &str, value: &JsonValue) -> Result<Timestamp, QueryError> {
    let text = value
        .as_str()
        .ok_or_else(|| QueryError::mapping(column, "expected timestamp text"))?;
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| QueryError::mapping(column, format!("invalid timestamp: {e}")))
}

pub fn get_timestamp(row: &Row, column: &str) -> Result<Timestamp, QueryError> {
    parse_timestamp(column, field(row, column)?)
}

pub fn get_opt_timestamp(row: &Row, column: &str) -> Result<Option<Timestamp>, QueryError> {
    nullable(row, column)
        .map(|value| parse_timestamp(column, value))
        .transpose()
}

/// Parse a text column into a closed enum.
pub fn get_enum<T>(row: &Row, column: &str) -> Result<T, QueryError>
where
    T: FromStr<Err = UnknownVariant>,
{
    get_str(row, column)?
        .parse()
        .map_err(|e: UnknownVariant| QueryError::mapping(column, e.to_string()))
}

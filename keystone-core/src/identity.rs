//! Identity and time types for Keystone entities

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Opaque entity identifier. Ids minted by the layer are UUIDv7 strings,
/// but ids coming from the store are never assumed to be UUIDs.
pub type EntityId = String;

/// Opaque identity of the caller, resolved upstream.
pub type ActorId = String;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for TTL and window values.
pub type DurationMs = i64;

/// Generate a new UUIDv7 entity id (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7().to_string()
}

/// Drop sub-microsecond precision so values survive a store round trip.
pub fn truncate_to_micros(ts: Timestamp) -> Timestamp {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_new_entity_id_is_uuid_text() {
        let id = new_entity_id();
        assert_eq!(id.len(), 36);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_truncate_to_micros_drops_nanos() {
        let ts = Utc
            .with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
            .single()
            .and_then(|t| t.with_nanosecond(123_456_789));
        let ts = match ts {
            Some(ts) => ts,
            None => panic!("valid timestamp"),
        };
        assert_eq!(truncate_to_micros(ts).nanosecond(), 123_456_000);
    }
}

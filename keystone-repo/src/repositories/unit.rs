//! Units and their child rows (rooms, customization options).
//!
//! Rooms and options are read-only from the layer's point of view: they are
//! fetched through [`Repository::find_related`] on the unit repository and
//! share the unit cache namespace.

use keystone_core::{
    CustomizationOption, EntityId, NewUnit, Page, Pagination, QueryError, Resource, Room, Row,
    SqlValue, Timestamp, Unit, UnitFilter, UnitPatch, Validate,
};
use keystone_storage::{Filter, Record, SortOrder};

use crate::error::RepoResult;
use crate::mapper::{
    get_bool, get_enum, get_f64, get_i64, get_str, get_timestamp, EntityMapper, RowMapper,
    NEWEST_FIRST,
};
use crate::repository::{Lookup, Repository};

pub struct UnitMapper;

pub type UnitRepository = Repository<UnitMapper>;

impl RowMapper for UnitMapper {
    type Entity = Unit;

    const RESOURCE: Resource = Resource::Units;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "development_id",
        "unit_number",
        "unit_type",
        "bedrooms",
        "bathrooms",
        "floor_area_sqm",
        "price_cents",
        "status",
        "created_at",
        "updated_at",
    ];
    const ORDER_BY: &'static [(&'static str, SortOrder)] = NEWEST_FIRST;

    fn map_to_entity(row: &Row) -> Result<Unit, QueryError> {
        Ok(Unit {
            id: get_str(row, "id")?,
            development_id: get_str(row, "development_id")?,
            unit_number: get_str(row, "unit_number")?,
            unit_type: get_enum(row, "unit_type")?,
            bedrooms: get_i64(row, "bedrooms")?,
            bathrooms: get_i64(row, "bathrooms")?,
            floor_area_sqm: get_f64(row, "floor_area_sqm")?,
            price_cents: get_i64(row, "price_cents")?,
            status: get_enum(row, "status")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }

    fn map_to_record(unit: &Unit) -> Record {
        vec![
            ("id", SqlValue::from(&unit.id)),
            ("development_id", SqlValue::from(&unit.development_id)),
            ("unit_number", SqlValue::from(&unit.unit_number)),
            ("unit_type", SqlValue::from(unit.unit_type.as_str())),
            ("bedrooms", SqlValue::from(unit.bedrooms)),
            ("bathrooms", SqlValue::from(unit.bathrooms)),
            ("floor_area_sqm", SqlValue::from(unit.floor_area_sqm)),
            ("price_cents", SqlValue::from(unit.price_cents)),
            ("status", SqlValue::from(unit.status.as_str())),
            ("created_at", SqlValue::from(unit.created_at)),
            ("updated_at", SqlValue::from(unit.updated_at)),
        ]
    }
}

impl EntityMapper for UnitMapper {
    type Draft = NewUnit;
    type Patch = UnitPatch;

    fn entity_id(unit: &Unit) -> &str {
        &unit.id
    }

    fn build(draft: NewUnit, id: EntityId, now: Timestamp) -> Unit {
        Unit {
            id,
            development_id: draft.development_id,
            unit_number: draft.unit_number,
            unit_type: draft.unit_type,
            bedrooms: draft.bedrooms,
            bathrooms: draft.bathrooms,
            floor_area_sqm: draft.floor_area_sqm,
            price_cents: draft.price_cents,
            status: draft.status,
            created_at: now,
            updated_at: now,
        }
    }

    fn patch_record(patch: &UnitPatch) -> Record {
        let mut record = Record::new();
        if let Some(unit_type) = patch.unit_type {
            record.push(("unit_type", SqlValue::from(unit_type.as_str())));
        }
        if let Some(bedrooms) = patch.bedrooms {
            record.push(("bedrooms", SqlValue::from(bedrooms)));
        }
        if let Some(bathrooms) = patch.bathrooms {
            record.push(("bathrooms", SqlValue::from(bathrooms)));
        }
        if let Some(area) = patch.floor_area_sqm {
            record.push(("floor_area_sqm", SqlValue::from(area)));
        }
        if let Some(price) = patch.price_cents {
            record.push(("price_cents", SqlValue::from(price)));
        }
        if let Some(status) = patch.status {
            record.push(("status", SqlValue::from(status.as_str())));
        }
        record
    }
}

pub struct RoomMapper;

impl RowMapper for RoomMapper {
    type Entity = Room;

    const RESOURCE: Resource = Resource::UnitRooms;
    const COLUMNS: &'static [&'static str] = &["id", "unit_id", "name", "room_type", "area_sqm"];
    const ORDER_BY: &'static [(&'static str, SortOrder)] =
        &[("name", SortOrder::Asc), ("id", SortOrder::Asc)];

    fn map_to_entity(row: &Row) -> Result<Room, QueryError> {
        Ok(Room {
            id: get_str(row, "id")?,
            unit_id: get_str(row, "unit_id")?,
            name: get_str(row, "name")?,
            room_type: get_str(row, "room_type")?,
            area_sqm: get_f64(row, "area_sqm")?,
        })
    }

    fn map_to_record(room: &Room) -> Record {
        vec![
            ("id", SqlValue::from(&room.id)),
            ("unit_id", SqlValue::from(&room.unit_id)),
            ("name", SqlValue::from(&room.name)),
            ("room_type", SqlValue::from(&room.room_type)),
            ("area_sqm", SqlValue::from(room.area_sqm)),
        ]
    }
}

pub struct CustomizationOptionMapper;

impl RowMapper for CustomizationOptionMapper {
    type Entity = CustomizationOption;

    const RESOURCE: Resource = Resource::CustomizationOptions;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "unit_id",
        "category",
        "name",
        "price_delta_cents",
        "is_default",
    ];
    const ORDER_BY: &'static [(&'static str, SortOrder)] = &[
        ("category", SortOrder::Asc),
        ("name", SortOrder::Asc),
        ("id", SortOrder::Asc),
    ];

    fn map_to_entity(row: &Row) -> Result<CustomizationOption, QueryError> {
        Ok(CustomizationOption {
            id: get_str(row, "id")?,
            unit_id: get_str(row, "unit_id")?,
            category: get_str(row, "category")?,
            name: get_str(row, "name")?,
            price_delta_cents: get_i64(row, "price_delta_cents")?,
            is_default: get_bool(row, "is_default")?,
        })
    }

    fn map_to_record(option: &CustomizationOption) -> Record {
        vec![
            ("id", SqlValue::from(&option.id)),
            ("unit_id", SqlValue::from(&option.unit_id)),
            ("category", SqlValue::from(&option.category)),
            ("name", SqlValue::from(&option.name)),
            ("price_delta_cents", SqlValue::from(option.price_delta_cents)),
            ("is_default", SqlValue::from(option.is_default)),
        ]
    }
}

impl Repository<UnitMapper> {
    /// Units of a development, narrowed by `filter`, with the total count.
    pub async fn find_by_development(
        &self,
        development_id: &str,
        filter: UnitFilter,
        pagination: Pagination,
        actor_id: &str,
    ) -> RepoResult<Page<Unit>> {
        let lookup = development_lookup("findByDevelopment", development_id, &filter);
        self.find_page_by(lookup, pagination, actor_id).await
    }

    /// Number of units of a development matching `filter`. Shares its cached
    /// count with [`find_by_development`](Self::find_by_development).
    pub async fn count_by_development(
        &self,
        development_id: &str,
        filter: UnitFilter,
        actor_id: &str,
    ) -> RepoResult<u64> {
        let lookup = development_lookup("countByDevelopment", development_id, &filter);
        self.count_by(lookup, actor_id).await
    }

    pub async fn get_rooms(&self, unit_id: &str, actor_id: &str) -> RepoResult<Vec<Room>> {
        let lookup = Lookup::many("getRooms").by_id("unit_id", unit_id);
        self.find_related::<RoomMapper>(lookup, actor_id).await
    }

    pub async fn get_customization_options(
        &self,
        unit_id: &str,
        actor_id: &str,
    ) -> RepoResult<Vec<CustomizationOption>> {
        let lookup = Lookup::many("getCustomizationOptions").by_id("unit_id", unit_id);
        self.find_related::<CustomizationOptionMapper>(lookup, actor_id)
            .await
    }
}

fn development_lookup(name: &'static str, development_id: &str, filter: &UnitFilter) -> Lookup {
    let mut lookup = Lookup::many(name)
        .by_id("development_id", development_id)
        .check(filter.validate());
    if let Some(status) = filter.status {
        lookup = lookup.filter(Filter::eq("status", status.as_str()));
    }
    if let Some(unit_type) = filter.unit_type {
        lookup = lookup.filter(Filter::eq("unit_type", unit_type.as_str()));
    }
    if let Some(bedrooms) = filter.min_bedrooms {
        lookup = lookup.filter(Filter::gte("bedrooms", bedrooms));
    }
    if let Some(min) = filter.min_price_cents {
        lookup = lookup.filter(Filter::gte("price_cents", min));
    }
    if let Some(max) = filter.max_price_cents {
        lookup = lookup.filter(Filter::lte("price_cents", max));
    }
    lookup
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::{UnitStatus, UnitType};
    use keystone_storage::QueryBuilder;

    #[test]
    fn test_child_mappers_build_valid_queries() {
        let rooms = QueryBuilder::new(RoomMapper::RESOURCE, RoomMapper::COLUMNS, RoomMapper::ORDER_BY);
        let options = QueryBuilder::new(
            CustomizationOptionMapper::RESOURCE,
            CustomizationOptionMapper::COLUMNS,
            CustomizationOptionMapper::ORDER_BY,
        );
        let sql = rooms
            .and_then(|b| b.select(&[Filter::eq("unit_id", "unit-1")], None))
            .map(|s| s.sql);
        assert_eq!(
            sql.as_deref(),
            Ok("SELECT * FROM unit_rooms WHERE unit_id = $1 ORDER BY name ASC, id ASC;")
        );
        assert!(options.is_ok());
    }

    #[test]
    fn test_option_row_maps_bool_and_delta() {
        let row: Row = serde_json::json!({
            "id": "opt-1",
            "unit_id": "unit-1",
            "category": "flooring",
            "name": "Oak",
            "price_delta_cents": -1500,
            "is_default": false
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        let option = CustomizationOptionMapper::map_to_entity(&row);
        assert_eq!(option.map(|o| (o.price_delta_cents, o.is_default)), Ok((-1500, false)));
    }

    #[test]
    fn test_unit_record_round_trips() {
        let unit = UnitMapper::build(
            NewUnit {
                development_id: "dev-1".to_string(),
                unit_number: "A-101".to_string(),
                unit_type: UnitType::Apartment,
                bedrooms: 2,
                bathrooms: 1,
                floor_area_sqm: 64.5,
                price_cents: 32_500_000,
                status: UnitStatus::Available,
            },
            "unit-1".to_string(),
            chrono::DateTime::UNIX_EPOCH,
        );
        let row: Row = UnitMapper::map_to_record(&unit)
            .into_iter()
            .map(|(column, value)| (column.to_string(), value.to_json()))
            .collect();
        assert_eq!(UnitMapper::map_to_entity(&row), Ok(unit));
    }
}

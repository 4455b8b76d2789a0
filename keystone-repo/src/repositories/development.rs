//! Developments.

use keystone_core::{
    truncate_to_micros, Development, DevelopmentPatch, DevelopmentStatus, EntityId,
    NewDevelopment, Page, Pagination, QueryError, Resource, Row, SqlValue, Timestamp,
};
use keystone_storage::{Filter, Record, SortOrder};

use crate::error::RepoResult;
use crate::mapper::{
    get_enum, get_i64, get_opt_str, get_opt_timestamp, get_str, get_timestamp, EntityMapper,
    RowMapper, NEWEST_FIRST,
};
use crate::repository::{Lookup, Repository};

pub struct DevelopmentMapper;

pub type DevelopmentRepository = Repository<DevelopmentMapper>;

impl RowMapper for DevelopmentMapper {
    type Entity = Development;

    const RESOURCE: Resource = Resource::Developments;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "developer_id",
        "name",
        "description",
        "city",
        "address",
        "status",
        "total_units",
        "completion_date",
        "created_at",
        "updated_at",
    ];
    const ORDER_BY: &'static [(&'static str, SortOrder)] = NEWEST_FIRST;

    fn map_to_entity(row: &Row) -> Result<Development, QueryError> {
        Ok(Development {
            id: get_str(row, "id")?,
            developer_id: get_str(row, "developer_id")?,
            name: get_str(row, "name")?,
            description: get_opt_str(row, "description")?,
            city: get_str(row, "city")?,
            address: get_str(row, "address")?,
            status: get_enum(row, "status")?,
            total_units: get_i64(row, "total_units")?,
            completion_date: get_opt_timestamp(row, "completion_date")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }

    fn map_to_record(development: &Development) -> Record {
        vec![
            ("id", SqlValue::from(&development.id)),
            ("developer_id", SqlValue::from(&development.developer_id)),
            ("name", SqlValue::from(&development.name)),
            ("description", SqlValue::from(development.description.clone())),
            ("city", SqlValue::from(&development.city)),
            ("address", SqlValue::from(&development.address)),
            ("status", SqlValue::from(development.status.as_str())),
            ("total_units", SqlValue::from(development.total_units)),
            ("completion_date", SqlValue::from(development.completion_date)),
            ("created_at", SqlValue::from(development.created_at)),
            ("updated_at", SqlValue::from(development.updated_at)),
        ]
    }
}

impl EntityMapper for DevelopmentMapper {
    type Draft = NewDevelopment;
    type Patch = DevelopmentPatch;

    fn entity_id(development: &Development) -> &str {
        &development.id
    }

    fn build(draft: NewDevelopment, id: EntityId, now: Timestamp) -> Development {
        Development {
            id,
            developer_id: draft.developer_id,
            name: draft.name,
            description: draft.description,
            city: draft.city,
            address: draft.address,
            status: draft.status,
            total_units: draft.total_units,
            completion_date: draft.completion_date.map(truncate_to_micros),
            created_at: now,
            updated_at: now,
        }
    }

    fn patch_record(patch: &DevelopmentPatch) -> Record {
        let mut record = Record::new();
        if let Some(name) = &patch.name {
            record.push(("name", SqlValue::from(name)));
        }
        if let Some(description) = &patch.description {
            record.push(("description", SqlValue::from(description)));
        }
        if let Some(status) = patch.status {
            record.push(("status", SqlValue::from(status.as_str())));
        }
        if let Some(total_units) = patch.total_units {
            record.push(("total_units", SqlValue::from(total_units)));
        }
        if let Some(date) = patch.completion_date {
            record.push(("completion_date", SqlValue::from(truncate_to_micros(date))));
        }
        record
    }
}

impl Repository<DevelopmentMapper> {
    /// Developments owned by one developer account.
    pub async fn find_by_developer_id(
        &self,
        developer_id: &str,
        pagination: Pagination,
        actor_id: &str,
    ) -> RepoResult<Page<Development>> {
        let lookup = Lookup::many("findByDeveloperId").by_id("developer_id", developer_id);
        self.find_page_by(lookup, pagination, actor_id).await
    }

    pub async fn find_by_status(
        &self,
        status: DevelopmentStatus,
        pagination: Pagination,
        actor_id: &str,
    ) -> RepoResult<Page<Development>> {
        let lookup = Lookup::many("findByStatus").filter(Filter::eq("status", status.as_str()));
        self.find_page_by(lookup, pagination, actor_id).await
    }
}

//! Sales.

use keystone_core::{
    truncate_to_micros, EntityId, NewSale, Page, Pagination, QueryError, Resource, Row, Sale,
    SalePatch, SqlValue, Timestamp,
};
use keystone_storage::{Record, SortOrder};

use crate::error::RepoResult;
use crate::mapper::{
    get_enum, get_i64, get_opt_timestamp, get_str, get_timestamp, EntityMapper, RowMapper,
    NEWEST_FIRST,
};
use crate::repository::{Lookup, Repository};

pub struct SaleMapper;

pub type SaleRepository = Repository<SaleMapper>;

impl RowMapper for SaleMapper {
    type Entity = Sale;

    const RESOURCE: Resource = Resource::Sales;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "unit_id",
        "buyer_id",
        "agreed_price_cents",
        "status",
        "completed_at",
        "created_at",
        "updated_at",
    ];
    const ORDER_BY: &'static [(&'static str, SortOrder)] = NEWEST_FIRST;

    fn map_to_entity(row: &Row) -> Result<Sale, QueryError> {
        Ok(Sale {
            id: get_str(row, "id")?,
            unit_id: get_str(row, "unit_id")?,
            buyer_id: get_str(row, "buyer_id")?,
            agreed_price_cents: get_i64(row, "agreed_price_cents")?,
            status: get_enum(row, "status")?,
            completed_at: get_opt_timestamp(row, "completed_at")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }

    fn map_to_record(sale: &Sale) -> Record {
        vec![
            ("id", SqlValue::from(&sale.id)),
            ("unit_id", SqlValue::from(&sale.unit_id)),
            ("buyer_id", SqlValue::from(&sale.buyer_id)),
            ("agreed_price_cents", SqlValue::from(sale.agreed_price_cents)),
            ("status", SqlValue::from(sale.status.as_str())),
            ("completed_at", SqlValue::from(sale.completed_at)),
            ("created_at", SqlValue::from(sale.created_at)),
            ("updated_at", SqlValue::from(sale.updated_at)),
        ]
    }
}

impl EntityMapper for SaleMapper {
    type Draft = NewSale;
    type Patch = SalePatch;

    fn entity_id(sale: &Sale) -> &str {
        &sale.id
    }

    fn build(draft: NewSale, id: EntityId, now: Timestamp) -> Sale {
        Sale {
            id,
            unit_id: draft.unit_id,
            buyer_id: draft.buyer_id,
            agreed_price_cents: draft.agreed_price_cents,
            status: draft.status,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn patch_record(patch: &SalePatch) -> Record {
        let mut record = Record::new();
        if let Some(price) = patch.agreed_price_cents {
            record.push(("agreed_price_cents", SqlValue::from(price)));
        }
        if let Some(status) = patch.status {
            record.push(("status", SqlValue::from(status.as_str())));
        }
        if let Some(completed_at) = patch.completed_at {
            record.push((
                "completed_at",
                SqlValue::from(truncate_to_micros(completed_at)),
            ));
        }
        record
    }
}

impl Repository<SaleMapper> {
    pub async fn find_by_buyer_id(
        &self,
        buyer_id: &str,
        pagination: Pagination,
        actor_id: &str,
    ) -> RepoResult<Page<Sale>> {
        let lookup = Lookup::many("findByBuyerId").by_id("buyer_id", buyer_id);
        self.find_page_by(lookup, pagination, actor_id).await
    }

    /// Every sale of one unit, newest first.
    pub async fn find_by_unit_id(&self, unit_id: &str, actor_id: &str) -> RepoResult<Vec<Sale>> {
        let lookup = Lookup::many("findByUnitId").by_id("unit_id", unit_id);
        self.find_list_by(lookup, actor_id).await
    }
}

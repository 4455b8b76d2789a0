//! Finance records: deposits, installments, mortgage drawdowns and refunds
//! tied to a sale. Cached with a shorter TTL than other namespaces.

use keystone_core::{
    truncate_to_micros, EntityId, FinanceRecord, FinanceRecordPatch, NewFinanceRecord, Page,
    Pagination, QueryError, Resource, Row, SqlValue, Timestamp,
};
use keystone_storage::{Record, SortOrder};

use crate::error::RepoResult;
use crate::mapper::{
    get_enum, get_i64, get_opt_timestamp, get_str, get_timestamp, EntityMapper, RowMapper,
    NEWEST_FIRST,
};
use crate::repository::{Lookup, Repository};

pub struct FinanceRecordMapper;

pub type FinanceRepository = Repository<FinanceRecordMapper>;

impl RowMapper for FinanceRecordMapper {
    type Entity = FinanceRecord;

    const RESOURCE: Resource = Resource::FinanceRecords;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "sale_id",
        "buyer_id",
        "record_type",
        "amount_cents",
        "currency",
        "status",
        "due_date",
        "paid_at",
        "created_at",
        "updated_at",
    ];
    const ORDER_BY: &'static [(&'static str, SortOrder)] = NEWEST_FIRST;

    fn map_to_entity(row: &Row) -> Result<FinanceRecord, QueryError> {
        Ok(FinanceRecord {
            id: get_str(row, "id")?,
            sale_id: get_str(row, "sale_id")?,
            buyer_id: get_str(row, "buyer_id")?,
            record_type: get_enum(row, "record_type")?,
            amount_cents: get_i64(row, "amount_cents")?,
            currency: get_str(row, "currency")?,
            status: get_enum(row, "status")?,
            due_date: get_opt_timestamp(row, "due_date")?,
            paid_at: get_opt_timestamp(row, "paid_at")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }

    fn map_to_record(record: &FinanceRecord) -> Record {
        vec![
            ("id", SqlValue::from(&record.id)),
            ("sale_id", SqlValue::from(&record.sale_id)),
            ("buyer_id", SqlValue::from(&record.buyer_id)),
            ("record_type", SqlValue::from(record.record_type.as_str())),
            ("amount_cents", SqlValue::from(record.amount_cents)),
            ("currency", SqlValue::from(&record.currency)),
            ("status", SqlValue::from(record.status.as_str())),
            ("due_date", SqlValue::from(record.due_date)),
            ("paid_at", SqlValue::from(record.paid_at)),
            ("created_at", SqlValue::from(record.created_at)),
            ("updated_at", SqlValue::from(record.updated_at)),
        ]
    }
}

impl EntityMapper for FinanceRecordMapper {
    type Draft = NewFinanceRecord;
    type Patch = FinanceRecordPatch;

    fn entity_id(record: &FinanceRecord) -> &str {
        &record.id
    }

    fn build(draft: NewFinanceRecord, id: EntityId, now: Timestamp) -> FinanceRecord {
        FinanceRecord {
            id,
            sale_id: draft.sale_id,
            buyer_id: draft.buyer_id,
            record_type: draft.record_type,
            amount_cents: draft.amount_cents,
            currency: draft.currency,
            status: draft.status,
            due_date: draft.due_date.map(truncate_to_micros),
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn patch_record(patch: &FinanceRecordPatch) -> Record {
        let mut record = Record::new();
        if let Some(amount) = patch.amount_cents {
            record.push(("amount_cents", SqlValue::from(amount)));
        }
        if let Some(status) = patch.status {
            record.push(("status", SqlValue::from(status.as_str())));
        }
        if let Some(due_date) = patch.due_date {
            record.push(("due_date", SqlValue::from(truncate_to_micros(due_date))));
        }
        if let Some(paid_at) = patch.paid_at {
            record.push(("paid_at", SqlValue::from(truncate_to_micros(paid_at))));
        }
        record
    }
}

impl Repository<FinanceRecordMapper> {
    pub async fn find_by_sale_id(
        &self,
        sale_id: &str,
        pagination: Pagination,
        actor_id: &str,
    ) -> RepoResult<Page<FinanceRecord>> {
        let lookup = Lookup::many("findBySaleId").by_id("sale_id", sale_id);
        self.find_page_by(lookup, pagination, actor_id).await
    }

    pub async fn find_by_buyer_id(
        &self,
        buyer_id: &str,
        pagination: Pagination,
        actor_id: &str,
    ) -> RepoResult<Page<FinanceRecord>> {
        let lookup = Lookup::many("findByBuyerId").by_id("buyer_id", buyer_id);
        self.find_page_by(lookup, pagination, actor_id).await
    }
}

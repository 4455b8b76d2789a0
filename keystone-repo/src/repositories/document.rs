//! Documents (contracts, floor plans, brochures, ...). Only metadata lives
//! here; the bytes are in object storage under `storage_key`.

use keystone_core::{
    Document, DocumentPatch, EntityId, NewDocument, Page, Pagination, QueryError, Resource, Row,
    SqlValue, Timestamp,
};
use keystone_storage::{Record, SortOrder};

use crate::error::RepoResult;
use crate::mapper::{
    get_enum, get_i64, get_opt_str, get_str, get_timestamp, EntityMapper, RowMapper,
    NEWEST_FIRST,
};
use crate::repository::{Lookup, Repository};

pub struct DocumentMapper;

pub type DocumentRepository = Repository<DocumentMapper>;

impl RowMapper for DocumentMapper {
    type Entity = Document;

    const RESOURCE: Resource = Resource::Documents;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "owner_id",
        "development_id",
        "sale_id",
        "title",
        "kind",
        "storage_key",
        "mime_type",
        "size_bytes",
        "created_at",
        "updated_at",
    ];
    const ORDER_BY: &'static [(&'static str, SortOrder)] = NEWEST_FIRST;

    fn map_to_entity(row: &Row) -> Result<Document, QueryError> {
        Ok(Document {
            id: get_str(row, "id")?,
            owner_id: get_str(row, "owner_id")?,
            development_id: get_opt_str(row, "development_id")?,
            sale_id: get_opt_str(row, "sale_id")?,
            title: get_str(row, "title")?,
            kind: get_enum(row, "kind")?,
            storage_key: get_str(row, "storage_key")?,
            mime_type: get_str(row, "mime_type")?,
            size_bytes: get_i64(row, "size_bytes")?,
            created_at: get_timestamp(row, "created_at")?,
            updated_at: get_timestamp(row, "updated_at")?,
        })
    }

    fn map_to_record(document: &Document) -> Record {
        vec![
            ("id", SqlValue::from(&document.id)),
            ("owner_id", SqlValue::from(&document.owner_id)),
            ("development_id", SqlValue::from(document.development_id.clone())),
            ("sale_id", SqlValue::from(document.sale_id.clone())),
            ("title", SqlValue::from(&document.title)),
            ("kind", SqlValue::from(document.kind.as_str())),
            ("storage_key", SqlValue::from(&document.storage_key)),
            ("mime_type", SqlValue::from(&document.mime_type)),
            ("size_bytes", SqlValue::from(document.size_bytes)),
            ("created_at", SqlValue::from(document.created_at)),
            ("updated_at", SqlValue::from(document.updated_at)),
        ]
    }
}

impl EntityMapper for DocumentMapper {
    type Draft = NewDocument;
    type Patch = DocumentPatch;

    fn entity_id(document: &Document) -> &str {
        &document.id
    }

    fn build(draft: NewDocument, id: EntityId, now: Timestamp) -> Document {
        Document {
            id,
            owner_id: draft.owner_id,
            development_id: draft.development_id,
            sale_id: draft.sale_id,
            title: draft.title,
            kind: draft.kind,
            storage_key: draft.storage_key,
            mime_type: draft.mime_type.to_ascii_lowercase(),
            size_bytes: draft.size_bytes,
            created_at: now,
            updated_at: now,
        }
    }

    fn patch_record(patch: &DocumentPatch) -> Record {
        let mut record = Record::new();
        if let Some(title) = &patch.title {
            record.push(("title", SqlValue::from(title)));
        }
        if let Some(kind) = patch.kind {
            record.push(("kind", SqlValue::from(kind.as_str())));
        }
        if let Some(sale_id) = &patch.sale_id {
            record.push(("sale_id", SqlValue::from(sale_id)));
        }
        record
    }
}

impl Repository<DocumentMapper> {
    pub async fn find_by_owner_id(
        &self,
        owner_id: &str,
        pagination: Pagination,
        actor_id: &str,
    ) -> RepoResult<Page<Document>> {
        let lookup = Lookup::many("findByOwnerId").by_id("owner_id", owner_id);
        self.find_page_by(lookup, pagination, actor_id).await
    }

    /// Documents attached to a development (brochures, floor plans).
    pub async fn find_by_development_id(
        &self,
        development_id: &str,
        actor_id: &str,
    ) -> RepoResult<Vec<Document>> {
        let lookup = Lookup::many("findByDevelopmentId").by_id("development_id", development_id);
        self.find_list_by(lookup, actor_id).await
    }
}

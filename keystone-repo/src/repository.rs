//! Protected repository engine.
//!
//! [`Repository`] runs every public operation through the same pipeline:
//!
//! 1. table and column allow-lists (statement construction)
//! 2. input validation
//! 3. per-actor rate limiting
//! 4. cache lookup (reads)
//! 5. statement execution
//! 6. row mapping
//! 7. cache populate (read miss) or invalidation (mutations)
//! 8. exactly one audit event
//!
//! The first failing step short-circuits the rest, except the audit event,
//! which is always recorded.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use keystone_core::{
    new_entity_id, truncate_to_micros, validate_entity_id, AuditStatus, Clock, Operation, Page,
    Pagination, QueryError, RateLimitPolicy, Resource, Row, SqlValue, Validate, ValidateNonEmpty,
    ValidationError,
};
use keystone_storage::{
    entity_key, query_key, CacheService, CacheStore, Filter, QueryBuilder, QueryExecutor,
    QueryResult, RateLimitKey, RateLimiter, Statement, QUERY_KEY_PREFIX,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::audit::AuditLog;
use crate::error::{RepoError, RepoResult};
use crate::mapper::{get_i64, EntityMapper, RowMapper};
use crate::metrics::LayerMetrics;

/// Shared collaborators injected into every repository.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn QueryExecutor>,
    pub limiter: Arc<RateLimiter>,
    pub policy: Arc<RateLimitPolicy>,
    pub cache: Arc<CacheService>,
    pub audit: Arc<AuditLog>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<LayerMetrics>,
}

/// A named finder: its operation, filters, and the validation of the
/// caller-supplied arguments the filters were built from.
#[derive(Debug, Clone)]
pub struct Lookup {
    operation: Operation,
    filters: Vec<Filter>,
    subject: Option<String>,
    check: Result<(), ValidationError>,
}

impl Lookup {
    /// Finder returning at most one entity.
    pub fn one(name: &'static str) -> Self {
        Self::new(Operation::FindOne(name))
    }

    /// Finder returning a list or a page.
    pub fn many(name: &'static str) -> Self {
        Self::new(Operation::FindMany(name))
    }

    fn new(operation: Operation) -> Self {
        Self {
            operation,
            filters: Vec::new(),
            subject: None,
            check: Ok(()),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Record an argument check. The first failure wins.
    pub fn check(mut self, result: Result<(), ValidationError>) -> Self {
        if self.check.is_ok() {
            self.check = result;
        }
        self
    }

    /// Id recorded as the audited resource id.
    pub fn subject(mut self, id: &str) -> Self {
        self.subject = Some(id.to_string());
        self
    }

    /// Equality filter on an id column: validated and recorded as subject.
    pub fn by_id(self, column: &'static str, id: &str) -> Self {
        self.check(validate_entity_id(column, id))
            .subject(id)
            .filter(Filter::eq(column, id))
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Stable cache-key component describing the filters.
    fn fingerprint(&self) -> String {
        JsonValue::Array(
            self.filters
                .iter()
                .map(|f| json!([f.column, format!("{:?}", f.op), f.value.to_json()]))
                .collect(),
        )
        .to_string()
    }
}

/// Per-call bookkeeping for the audit event.
struct Call<'a> {
    operation: Operation,
    actor_id: &'a str,
    resource_id: Option<String>,
    cache_hit: bool,
    started: Instant,
}

impl<'a> Call<'a> {
    fn new(operation: Operation, actor_id: &'a str, resource_id: Option<&str>) -> Self {
        Self {
            operation,
            actor_id,
            resource_id: resource_id.map(str::to_string),
            cache_hit: false,
            started: Instant::now(),
        }
    }
}

/// Generic protected repository over a mapper.
pub struct Repository<M: RowMapper> {
    deps: Collaborators,
    builder: QueryBuilder,
    cache: Arc<CacheStore>,
    _mapper: PhantomData<fn() -> M>,
}

impl<M: RowMapper> std::fmt::Debug for Repository<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("resource", &M::RESOURCE)
            .field("namespace", &self.cache.namespace())
            .finish_non_exhaustive()
    }
}

impl<M: RowMapper> Repository<M> {
    /// Fails if the mapper's table or ordering columns are not valid identifiers.
    pub fn new(deps: Collaborators) -> RepoResult<Self> {
        let builder = QueryBuilder::new(M::RESOURCE, M::COLUMNS, M::ORDER_BY)?;
        let cache = deps.cache.namespace(M::RESOURCE.namespace());
        Ok(Self {
            deps,
            builder,
            cache,
            _mapper: PhantomData,
        })
    }

    pub fn resource(&self) -> Resource {
        M::RESOURCE
    }

    /// Cache store of this repository's namespace.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn find_by_id(&self, id: &str, actor_id: &str) -> RepoResult<Option<M::Entity>> {
        let mut call = Call::new(Operation::FindById, actor_id, Some(id));
        let result = self.find_by_id_inner(id, &mut call).await;
        self.finish(call, result)
    }

    async fn find_by_id_inner(
        &self,
        id: &str,
        call: &mut Call<'_>,
    ) -> RepoResult<Option<M::Entity>> {
        let statement = self.builder.select_by_id(id)?;
        validate_entity_id("id", id)?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;

        let key = entity_key(id);
        if let Some(entity) = self.cache_get::<M::Entity>(&key) {
            call.cache_hit = true;
            return Ok(Some(entity));
        }

        let result = self.run(call, &statement).await?;
        let entity = match result.rows.first() {
            Some(row) => Some(self.map_row::<M>(call, row)?),
            None => None,
        };
        if let Some(entity) = &entity {
            self.cache_put(&key, entity);
        }
        Ok(entity)
    }

    pub async fn find_all(
        &self,
        actor_id: &str,
        pagination: Pagination,
    ) -> RepoResult<Vec<M::Entity>> {
        let mut call = Call::new(Operation::FindAll, actor_id, None);
        let result = self.find_all_inner(pagination, &mut call).await;
        self.finish(call, result)
    }

    async fn find_all_inner(
        &self,
        pagination: Pagination,
        call: &mut Call<'_>,
    ) -> RepoResult<Vec<M::Entity>> {
        let statement = self.builder.select(&[], Some(pagination))?;
        pagination.validate()?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;

        let key = self.derived_key(
            "findAll",
            &[&pagination.page.to_string(), &pagination.limit.to_string()],
        );
        self.cached_rows::<M>(call, &key, &statement).await
    }

    /// Single-entity finder. Misses are not cached.
    pub async fn find_one_by(
        &self,
        lookup: Lookup,
        actor_id: &str,
    ) -> RepoResult<Option<M::Entity>> {
        let mut call = Call::new(lookup.operation, actor_id, lookup.subject.as_deref());
        let result = self.find_one_by_inner(lookup, &mut call).await;
        self.finish(call, result)
    }

    async fn find_one_by_inner(
        &self,
        lookup: Lookup,
        call: &mut Call<'_>,
    ) -> RepoResult<Option<M::Entity>> {
        let statement = self
            .builder
            .select(&lookup.filters, Some(Pagination::new(1, 1)))?;
        lookup.check.clone()?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;

        let key = self.derived_key(lookup.operation.name(), &[&lookup.fingerprint()]);
        if let Some(entity) = self.cache_get::<M::Entity>(&key) {
            call.cache_hit = true;
            return Ok(Some(entity));
        }

        let result = self.run(call, &statement).await?;
        let entity = match result.rows.first() {
            Some(row) => Some(self.map_row::<M>(call, row)?),
            None => None,
        };
        if let Some(entity) = &entity {
            self.cache_put(&key, entity);
        }
        Ok(entity)
    }

    /// Unpaged listing in the mapper's order.
    pub async fn find_list_by(&self, lookup: Lookup, actor_id: &str) -> RepoResult<Vec<M::Entity>> {
        let mut call = Call::new(lookup.operation, actor_id, lookup.subject.as_deref());
        let result = self.find_list_by_inner(lookup, &mut call).await;
        self.finish(call, result)
    }

    async fn find_list_by_inner(
        &self,
        lookup: Lookup,
        call: &mut Call<'_>,
    ) -> RepoResult<Vec<M::Entity>> {
        let statement = self.builder.select(&lookup.filters, None)?;
        lookup.check.clone()?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;

        let key = self.derived_key(lookup.operation.name(), &[&lookup.fingerprint()]);
        self.cached_rows::<M>(call, &key, &statement).await
    }

    /// Filtered page plus the total row count. Items and count are cached
    /// under separate keys; the count key ignores pagination so every page
    /// of the same filters shares it.
    pub async fn find_page_by(
        &self,
        lookup: Lookup,
        pagination: Pagination,
        actor_id: &str,
    ) -> RepoResult<Page<M::Entity>> {
        let mut call = Call::new(lookup.operation, actor_id, lookup.subject.as_deref());
        let result = self.find_page_by_inner(lookup, pagination, &mut call).await;
        self.finish(call, result)
    }

    async fn find_page_by_inner(
        &self,
        lookup: Lookup,
        pagination: Pagination,
        call: &mut Call<'_>,
    ) -> RepoResult<Page<M::Entity>> {
        let items_statement = self.builder.select(&lookup.filters, Some(pagination))?;
        let count_statement = self.builder.count(&lookup.filters)?;
        lookup.check.clone()?;
        pagination.validate()?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;

        let fingerprint = lookup.fingerprint();
        let items_key = self.derived_key(
            lookup.operation.name(),
            &[
                &pagination.page.to_string(),
                &pagination.limit.to_string(),
                &fingerprint,
            ],
        );
        let (items, items_hit) = match self.cache_get::<Vec<M::Entity>>(&items_key) {
            Some(items) => (items, true),
            None => {
                let result = self.run(call, &items_statement).await?;
                let items = self.map_rows::<M>(call, &result.rows)?;
                self.cache_put(&items_key, &items);
                (items, false)
            }
        };
        let (total, count_hit) = self.cached_count(call, &fingerprint, &count_statement).await?;
        call.cache_hit = items_hit && count_hit;

        Ok(Page {
            items,
            total,
            page: pagination.page,
            limit: pagination.limit,
            total_pages: pagination.total_pages(total),
        })
    }

    /// Number of rows matching the lookup's filters.
    pub async fn count_by(&self, lookup: Lookup, actor_id: &str) -> RepoResult<u64> {
        let mut call = Call::new(lookup.operation, actor_id, lookup.subject.as_deref());
        let result = self.count_by_inner(lookup, &mut call).await;
        self.finish(call, result)
    }

    async fn count_by_inner(&self, lookup: Lookup, call: &mut Call<'_>) -> RepoResult<u64> {
        let statement = self.builder.count(&lookup.filters)?;
        lookup.check.clone()?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;

        let (total, hit) = self
            .cached_count(call, &lookup.fingerprint(), &statement)
            .await?;
        call.cache_hit = hit;
        Ok(total)
    }

    /// Child rows of another table, cached and audited under this
    /// repository's resource.
    pub async fn find_related<C: RowMapper>(
        &self,
        lookup: Lookup,
        actor_id: &str,
    ) -> RepoResult<Vec<C::Entity>> {
        let mut call = Call::new(lookup.operation, actor_id, lookup.subject.as_deref());
        let result = self.find_related_inner::<C>(lookup, &mut call).await;
        self.finish(call, result)
    }

    async fn find_related_inner<C: RowMapper>(
        &self,
        lookup: Lookup,
        call: &mut Call<'_>,
    ) -> RepoResult<Vec<C::Entity>> {
        let builder = QueryBuilder::new(C::RESOURCE, C::COLUMNS, C::ORDER_BY)?;
        let statement = builder.select(&lookup.filters, None)?;
        lookup.check.clone()?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;

        let key = self.derived_key(
            lookup.operation.name(),
            &[C::RESOURCE.table_name(), &lookup.fingerprint()],
        );
        self.cached_rows::<C>(call, &key, &statement).await
    }

    // ------------------------------------------------------------------------
    // Pipeline steps
    // ------------------------------------------------------------------------

    async fn enforce_rate_limit(&self, call: &Call<'_>) -> RepoResult<()> {
        let policy = &self.deps.policy;
        if !policy.enabled {
            return Ok(());
        }
        let limit = policy.limit_for(call.operation);
        let key = RateLimitKey::for_operation(M::RESOURCE, call.operation, call.actor_id);
        if self.deps.limiter.check_limit(&key, limit).await {
            return Ok(());
        }
        self.deps
            .metrics
            .record_rate_limited(M::RESOURCE.table_name(), call.operation.name());
        Err(RepoError::RateLimitExceeded {
            resource: M::RESOURCE,
            operation: call.operation.name().to_string(),
            actor_id: call.actor_id.to_string(),
            limit: limit.max,
            window_ms: limit.window_ms(),
        })
    }

    async fn run(&self, call: &Call<'_>, statement: &Statement) -> RepoResult<QueryResult> {
        debug!(
            resource = %M::RESOURCE,
            operation = call.operation.name(),
            sql = %statement.sql,
            params = statement.params.len(),
            "Executing statement"
        );
        self.deps
            .executor
            .execute(statement)
            .await
            .map_err(|source| query_error::<M>(call, source))
    }

    fn map_row<C: RowMapper>(&self, call: &Call<'_>, row: &Row) -> RepoResult<C::Entity> {
        C::map_to_entity(row).map_err(|source| query_error::<M>(call, source))
    }

    fn map_rows<C: RowMapper>(&self, call: &Call<'_>, rows: &[Row]) -> RepoResult<Vec<C::Entity>> {
        rows.iter().map(|row| self.map_row::<C>(call, row)).collect()
    }

    async fn cached_rows<C: RowMapper>(
        &self,
        call: &mut Call<'_>,
        key: &str,
        statement: &Statement,
    ) -> RepoResult<Vec<C::Entity>> {
        if let Some(items) = self.cache_get::<Vec<C::Entity>>(key) {
            call.cache_hit = true;
            return Ok(items);
        }
        let result = self.run(call, statement).await?;
        let items = self.map_rows::<C>(call, &result.rows)?;
        self.cache_put(key, &items);
        Ok(items)
    }

    async fn cached_count(
        &self,
        call: &Call<'_>,
        fingerprint: &str,
        statement: &Statement,
    ) -> RepoResult<(u64, bool)> {
        let key = self.derived_key("count", &[fingerprint]);
        if let Some(total) = self.cache_get::<u64>(&key) {
            return Ok((total, true));
        }
        let result = self.run(call, statement).await?;
        let total = result
            .rows
            .first()
            .map(read_count)
            .transpose()
            .map_err(|source| query_error::<M>(call, source))?
            .unwrap_or(0);
        self.cache_put(&key, &total);
        Ok((total, false))
    }

    /// Derived keys carry the table so repositories sharing a namespace
    /// never read each other's listings.
    fn derived_key(&self, kind: &str, parts: &[&str]) -> String {
        let mut all = Vec::with_capacity(parts.len() + 1);
        all.push(M::RESOURCE.table_name());
        all.extend_from_slice(parts);
        query_key(kind, &all)
    }

    fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let namespace = self.cache.namespace().as_str();
        match self.cache.get::<T>(key) {
            Ok(Some(value)) => {
                self.deps.metrics.record_cache_lookup(namespace, "hit");
                Some(value)
            }
            Ok(None) => {
                self.deps.metrics.record_cache_lookup(namespace, "miss");
                None
            }
            Err(e) => {
                self.deps.metrics.record_cache_lookup(namespace, "error");
                warn!(namespace, key, error = %e, "Cache read failed; treating as miss");
                None
            }
        }
    }

    fn cache_put<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = self.cache.set(key, value, self.cache.default_ttl()) {
            warn!(namespace = self.cache.namespace().as_str(), key, error = %e, "Cache write failed");
        }
    }

    /// Drop the entity key and every derived key of the namespace.
    fn invalidate(&self, id: &str) {
        let namespace = self.cache.namespace().as_str();
        if let Err(e) = self.cache.invalidate(&entity_key(id)) {
            warn!(namespace, id, error = %e, "Cache invalidation failed");
        }
        match self.cache.invalidate_prefix(QUERY_KEY_PREFIX) {
            Ok(dropped) => debug!(namespace, id, dropped, "Invalidated derived cache keys"),
            Err(e) => warn!(namespace, id, error = %e, "Cache prefix invalidation failed"),
        }
    }

    /// Record metrics and the audit event, then hand the result back.
    fn finish<T>(&self, call: Call<'_>, result: RepoResult<T>) -> RepoResult<T> {
        let elapsed = call.started.elapsed();
        let operation = call.operation.name();
        let mut details = json!({
            "operation": operation,
            "table": M::RESOURCE.table_name(),
            "cache_hit": call.cache_hit,
            "duration_ms": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });

        let status = match &result {
            Ok(_) => {
                debug!(
                    resource = %M::RESOURCE,
                    operation,
                    actor_id = call.actor_id,
                    cache_hit = call.cache_hit,
                    "Repository operation succeeded"
                );
                AuditStatus::Success
            }
            Err(e) => {
                details["error_code"] = json!(e.code());
                details["error"] = json!(e.to_string());
                if e.is_not_found() {
                    debug!(resource = %M::RESOURCE, operation, error = %e, "Repository operation failed");
                } else {
                    warn!(
                        resource = %M::RESOURCE,
                        operation,
                        actor_id = call.actor_id,
                        code = e.code(),
                        error = %e,
                        "Repository operation failed"
                    );
                }
                AuditStatus::Failure
            }
        };

        self.deps.metrics.record_operation(
            operation,
            M::RESOURCE.table_name(),
            result.is_ok(),
            elapsed.as_secs_f64(),
        );
        self.deps.audit.log_audit_event(
            operation,
            M::RESOURCE.resource_type(),
            call.actor_id,
            call.resource_id.as_deref(),
            status,
            details,
        );
        result
    }
}

// ----------------------------------------------------------------------------
// Mutations
// ----------------------------------------------------------------------------

impl<M: EntityMapper> Repository<M> {
    /// Insert a new entity with a freshly generated id.
    pub async fn create(&self, draft: M::Draft, actor_id: &str) -> RepoResult<M::Entity> {
        let mut call = Call::new(Operation::Create, actor_id, None);
        let result = self.create_inner(draft, &mut call).await;
        self.finish(call, result)
    }

    async fn create_inner(&self, draft: M::Draft, call: &mut Call<'_>) -> RepoResult<M::Entity> {
        draft.validate()?;
        let now = truncate_to_micros(self.deps.clock.now());
        let entity = M::build(draft, new_entity_id(), now);
        let id = M::entity_id(&entity).to_string();
        let statement = self.builder.insert(M::map_to_record(&entity))?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;
        call.resource_id = Some(id.clone());

        let result = self.run(call, &statement).await?;
        let row = result.rows.first().ok_or_else(|| {
            query_error::<M>(
                call,
                QueryError::Execution {
                    reason: "insert returned no row".to_string(),
                },
            )
        })?;
        let created = self.map_row::<M>(call, row)?;
        self.invalidate(&id);
        Ok(created)
    }

    /// Apply a patch. `NotFound` when no row has the id.
    pub async fn update(
        &self,
        id: &str,
        patch: M::Patch,
        actor_id: &str,
    ) -> RepoResult<M::Entity> {
        let mut call = Call::new(Operation::Update, actor_id, Some(id));
        let result = self.update_inner(id, patch, &mut call).await;
        self.finish(call, result)
    }

    async fn update_inner(
        &self,
        id: &str,
        patch: M::Patch,
        call: &mut Call<'_>,
    ) -> RepoResult<M::Entity> {
        validate_entity_id("id", id)?;
        patch.validate()?;
        let mut record = M::patch_record(&patch);
        let now = truncate_to_micros(self.deps.clock.now());
        record.push(("updated_at", SqlValue::from(now)));
        let statement = self.builder.update(id, record)?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;

        let result = self.run(call, &statement).await?;
        let row = result.rows.first().ok_or_else(|| RepoError::NotFound {
            resource: M::RESOURCE,
            id: id.to_string(),
        })?;
        let updated = self.map_row::<M>(call, row)?;
        self.invalidate(id);
        Ok(updated)
    }

    /// Delete by id. `NotFound` when no row has the id.
    pub async fn delete(&self, id: &str, actor_id: &str) -> RepoResult<()> {
        let mut call = Call::new(Operation::Delete, actor_id, Some(id));
        let result = self.delete_inner(id, &mut call).await;
        self.finish(call, result)
    }

    async fn delete_inner(&self, id: &str, call: &mut Call<'_>) -> RepoResult<()> {
        let statement = self.builder.delete(id)?;
        validate_entity_id("id", id)?;
        validate_actor(call.actor_id)?;
        self.enforce_rate_limit(call).await?;

        let result = self.run(call, &statement).await?;
        if result.rows.is_empty() && result.row_count == 0 {
            return Err(RepoError::NotFound {
                resource: M::RESOURCE,
                id: id.to_string(),
            });
        }
        self.invalidate(id);
        Ok(())
    }
}

fn validate_actor(actor_id: &str) -> Result<(), ValidationError> {
    actor_id.validate_non_empty("actor_id")
}

fn query_error<M: RowMapper>(call: &Call<'_>, source: QueryError) -> RepoError {
    RepoError::QueryExecution {
        resource: M::RESOURCE,
        operation: call.operation.name().to_string(),
        actor_id: call.actor_id.to_string(),
        source,
    }
}

fn read_count(row: &Row) -> Result<u64, QueryError> {
    let count = get_i64(row, "count")?;
    u64::try_from(count).map_err(|_| QueryError::mapping("count", "negative count"))
}

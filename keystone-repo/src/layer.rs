//! The data layer service.
//!
//! Built once at start-up. Owns the cache service, the rate limiter, the
//! audit log and the metrics registry, and hands out one repository per
//! entity. Everything is explicitly constructed and passed down; nothing in
//! the layer is process-global.

use std::sync::Arc;

use keystone_core::{Clock, CounterStoreError, Operation, Resource, SystemClock};
use keystone_storage::{
    CacheService, CounterStore, InMemoryCounterStore, QueryExecutor, RateLimitKey, RateLimiter,
};
use tracing::info;

use crate::audit::{AuditLog, AuditSink, MemoryAuditSink, TracingAuditSink};
use crate::config::LayerConfig;
use crate::error::LayerError;
use crate::metrics::LayerMetrics;
use crate::repositories::{
    DevelopmentRepository, DocumentRepository, FinanceRepository, SaleRepository,
    UnitRepository, UserRepository,
};
use crate::repository::Collaborators;

/// Assembles a [`DataLayer`].
pub struct DataLayerBuilder {
    config: LayerConfig,
    executor: Arc<dyn QueryExecutor>,
    counters: Option<Arc<dyn CounterStore>>,
    sinks: Vec<Arc<dyn AuditSink>>,
    keep_recent_audit: bool,
    clock: Arc<dyn Clock>,
}

impl DataLayerBuilder {
    pub fn with_config(mut self, config: LayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Counter store shared by every process enforcing the same limits.
    /// Defaults to an in-process store.
    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counters = Some(store);
        self
    }

    /// Add an audit sink. Without any, events go to `tracing`.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Also keep the most recent `audit_capacity` events in memory.
    pub fn with_recent_audit(mut self) -> Self {
        self.keep_recent_audit = true;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<DataLayer, LayerError> {
        let metrics = Arc::new(LayerMetrics::new()?);
        let clock = self.clock;

        let counters = self
            .counters
            .unwrap_or_else(|| {
                Arc::new(InMemoryCounterStore::new(Arc::clone(&clock))) as Arc<dyn CounterStore>
            });
        let limiter = Arc::new(RateLimiter::new(counters, Arc::clone(&clock)));

        let mut sinks = self.sinks;
        if sinks.is_empty() {
            sinks.push(Arc::new(TracingAuditSink));
        }
        let recent_audit = if self.keep_recent_audit {
            let sink = Arc::new(MemoryAuditSink::new(self.config.audit_capacity));
            sinks.push(sink.clone());
            Some(sink)
        } else {
            None
        };
        let audit = Arc::new(
            AuditLog::new(sinks, Arc::clone(&clock))
                .with_dropped_counter(metrics.audit_dropped_total.clone()),
        );

        let cache = Arc::new(CacheService::new(self.config.cache.clone(), Arc::clone(&clock)));

        let deps = Collaborators {
            executor: self.executor,
            limiter,
            policy: Arc::new(self.config.rate_limits.clone()),
            cache,
            audit,
            clock,
            metrics,
        };

        let layer = DataLayer {
            users: UserRepository::new(deps.clone())?,
            developments: DevelopmentRepository::new(deps.clone())?,
            units: UnitRepository::new(deps.clone())?,
            sales: SaleRepository::new(deps.clone())?,
            documents: DocumentRepository::new(deps.clone())?,
            finance: FinanceRepository::new(deps.clone())?,
            config: self.config,
            recent_audit,
            deps,
        };
        info!(
            rate_limits_enabled = layer.config.rate_limits.enabled,
            default_ttl_secs = layer.config.cache.default_ttl.as_secs(),
            "Data layer initialized"
        );
        Ok(layer)
    }
}

/// Process-wide entry point to the protected repositories.
pub struct DataLayer {
    config: LayerConfig,
    deps: Collaborators,
    recent_audit: Option<Arc<MemoryAuditSink>>,
    users: UserRepository,
    developments: DevelopmentRepository,
    units: UnitRepository,
    sales: SaleRepository,
    documents: DocumentRepository,
    finance: FinanceRepository,
}

impl std::fmt::Debug for DataLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLayer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DataLayer {
    /// Start building a layer around a query executor. Uses the default
    /// configuration and the system clock unless overridden.
    pub fn builder(executor: Arc<dyn QueryExecutor>) -> DataLayerBuilder {
        DataLayerBuilder {
            config: LayerConfig::default(),
            executor,
            counters: None,
            sinks: Vec::new(),
            keep_recent_audit: false,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn users(&self) -> &UserRepository {
        &self.users
    }

    pub fn developments(&self) -> &DevelopmentRepository {
        &self.developments
    }

    pub fn units(&self) -> &UnitRepository {
        &self.units
    }

    pub fn sales(&self) -> &SaleRepository {
        &self.sales
    }

    pub fn documents(&self) -> &DocumentRepository {
        &self.documents
    }

    pub fn finance(&self) -> &FinanceRepository {
        &self.finance
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.deps.cache
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.deps.audit
    }

    /// In-memory audit buffer, when enabled with `with_recent_audit`.
    pub fn recent_audit(&self) -> Option<&Arc<MemoryAuditSink>> {
        self.recent_audit.as_ref()
    }

    pub fn metrics(&self) -> &LayerMetrics {
        &self.deps.metrics
    }

    /// Clear every rate-limit window of one `(resource, operation, actor)`.
    pub async fn reset_rate_limit(
        &self,
        resource: Resource,
        operation: Operation,
        actor_id: &str,
    ) -> Result<u64, CounterStoreError> {
        let key = RateLimitKey::for_operation(resource, operation, actor_id);
        self.deps.limiter.reset(key.as_str()).await
    }

    /// Start the periodic expired-entry sweep. Returns `false` outside a
    /// tokio runtime or when it is already running.
    pub fn start_background_tasks(&self) -> bool {
        self.deps.cache.spawn_sweeper()
    }

    /// Stop background work and drop all cached data.
    pub fn shutdown(&self) {
        self.deps.cache.shutdown();
        info!(audit_dropped = self.deps.audit.dropped(), "Data layer shut down");
    }
}

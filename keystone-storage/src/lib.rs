//! Keystone Storage - Cache, Rate Limiting and Query Execution
//!
//! The collaborators the repository engine is built from: a namespaced TTL
//! cache, a fixed-window rate limiter over a pluggable counter store, and the
//! statement/executor seam with an in-memory executor. Postgres-backed
//! implementations live in keystone-repo.

pub mod cache;
pub mod memory;
pub mod query;
pub mod rate_limit;

pub use cache::{
    entity_key, query_key, CacheConfig, CacheService, CacheStats, CacheStore, QUERY_KEY_PREFIX,
};
pub use memory::InMemoryExecutor;
pub use query::{
    Filter, FilterOp, QueryBuilder, QueryExecutor, QueryResult, Record, SortOrder, Statement,
    StatementShape,
};
pub use rate_limit::{
    glob_escape, glob_match, CounterStore, InMemoryCounterStore, RateLimitKey, RateLimiter,
};

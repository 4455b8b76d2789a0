//! Namespaced TTL cache.
//!
//! Each [`CacheNamespace`](keystone_core::CacheNamespace) gets its own
//! [`CacheStore`]. The [`CacheService`] is constructed explicitly and passed
//! to whoever needs it; there are no process-global cache maps.
//!
//! # Key conventions
//!
//! Entity reads are stored under [`entity_key`] (`id:<id>`). Everything else
//! a repository derives from a query (listings, pages, counts, lookups by a
//! non-id column) lives under the [`QUERY_KEY_PREFIX`] so a mutation can drop
//! all of it with one `invalidate_prefix` call.
//!
//! Cache failures are never fatal; callers treat a [`CacheError`] as a miss.
//!
//! [`CacheError`]: keystone_core::CacheError

pub mod service;
pub mod store;

pub use service::{CacheConfig, CacheService};
pub use store::{CacheStats, CacheStore};

/// Prefix shared by all derived (non-entity) keys.
pub const QUERY_KEY_PREFIX: &str = "q:";

/// Key of a single entity.
pub fn entity_key(id: &str) -> String {
    format!("id:{id}")
}

/// Key of a derived query result. `parts` are joined with `:`.
pub fn query_key(kind: &str, parts: &[&str]) -> String {
    let mut key = String::from(QUERY_KEY_PREFIX);
    key.push_str(kind);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

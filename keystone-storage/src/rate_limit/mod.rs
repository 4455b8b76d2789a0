//! Per-actor fixed-window rate limiting over a shared counter store.

pub mod limiter;
pub mod store;

pub use limiter::{RateLimitKey, RateLimiter};
pub use store::{glob_escape, glob_match, CounterStore, InMemoryCounterStore};

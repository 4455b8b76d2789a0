//! Fixed-window rate limiter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use keystone_core::{Clock, CounterStoreError, Operation, RateLimit, Resource};
use tracing::{error, warn};

use super::store::{glob_escape, CounterStore};

/// Rate-limit key of an operation: `ratelimit:<table>:<operation>:<actor>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn for_operation(resource: Resource, operation: Operation, actor_id: &str) -> Self {
        Self(format!(
            "ratelimit:{}:{}:{}",
            resource.table_name(),
            operation.name(),
            actor_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counts calls per key in fixed windows of wall-clock time.
///
/// The window key is `<key>:<floor(now_ms / window_ms)>`, so a new window
/// starts a fresh counter and the old one expires on its own.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Window key for `key` at the current time.
    pub fn window_key(&self, key: &str, window: Duration) -> String {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
        format!("{key}:{}", self.clock.now_ms().div_euclid(window_ms))
    }

    /// Count one call against `key`. Returns `false` once more than `max`
    /// calls happened in the current window.
    ///
    /// Fails open: if the counter store errors the call is allowed.
    pub async fn check(&self, key: &str, max: u32, window: Duration) -> bool {
        let window_key = self.window_key(key, window);
        match self.count(&window_key, window).await {
            Ok(count) if count > i64::from(max) => {
                warn!(key, count, max, window_ms = window.as_millis() as u64, "Rate limit exceeded");
                false
            }
            Ok(_) => true,
            Err(e) => {
                error!(key, error = %e, "Rate limiter store failed; allowing request");
                true
            }
        }
    }

    /// [`check`](Self::check) with a policy limit.
    pub async fn check_limit(&self, key: &RateLimitKey, limit: RateLimit) -> bool {
        self.check(key.as_str(), limit.max, limit.window).await
    }

    async fn count(&self, window_key: &str, window: Duration) -> Result<i64, CounterStoreError> {
        let count = self.store.incr(window_key).await?;
        if count == 1 {
            // A missing TTL only delays cleanup; the count itself is valid.
            if let Err(e) = self.store.expire(window_key, window).await {
                error!(key = window_key, error = %e, "Failed to set rate limit window expiry");
            }
        }
        Ok(count)
    }

    /// Drop every window of `key`. Returns the number of windows removed.
    ///
    /// Only `<key>:<window index>` entries match, so an actor whose id
    /// extends this key with `:` keeps its own windows.
    pub async fn reset(&self, key: &str) -> Result<u64, CounterStoreError> {
        let pattern = format!("{}:*", glob_escape(key));
        let keys: Vec<String> = self
            .store
            .keys(&pattern)
            .await?
            .into_iter()
            .filter(|candidate| is_window_of(key, candidate))
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        self.store.del(&keys).await
    }
}

fn is_window_of(key: &str, candidate: &str) -> bool {
    candidate
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::store::InMemoryCounterStore;
    use async_trait::async_trait;
    use keystone_core::ManualClock;

    fn limiter() -> (RateLimiter, Arc<ManualClock>, Arc<InMemoryCounterStore>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryCounterStore::new(clock.clone()));
        (RateLimiter::new(store.clone(), clock.clone()), clock, store)
    }

    #[tokio::test]
    async fn test_fixed_window_allows_max_then_blocks() {
        let (limiter, clock, _) = limiter();
        let window = Duration::from_millis(1000);
        for _ in 0..3 {
            assert!(limiter.check("k", 3, window).await);
        }
        assert!(!limiter.check("k", 3, window).await);

        clock.advance(window);
        assert!(limiter.check("k", 3, window).await);
    }

    #[tokio::test]
    async fn test_first_increment_sets_window_expiry() {
        let (limiter, clock, store) = limiter();
        let window = Duration::from_millis(1000);
        assert!(limiter.check("k", 3, window).await);
        let window_key = limiter.window_key("k", window);
        assert_eq!(store.get(&window_key), Some(1));
        clock.advance(window);
        assert_eq!(store.get(&window_key), None);
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (limiter, _, _) = limiter();
        let window = Duration::from_secs(60);
        assert!(limiter.check("a", 1, window).await);
        assert!(!limiter.check("a", 1, window).await);
        assert!(limiter.check("b", 1, window).await);
    }

    #[tokio::test]
    async fn test_reset_clears_all_windows() {
        let (limiter, clock, store) = limiter();
        let window = Duration::from_millis(1000);
        assert!(limiter.check("k", 1, window).await);
        clock.advance(Duration::from_millis(500));
        assert!(!limiter.check("k", 1, window).await);
        assert!(limiter.check("other", 1, window).await);

        assert_eq!(limiter.reset("k").await, Ok(1));
        assert!(limiter.check("k", 1, window).await);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_leaves_extended_keys_alone() {
        let (limiter, _, store) = limiter();
        let window = Duration::from_secs(60);
        assert!(limiter.check("ratelimit:users:findById:a", 5, window).await);
        assert!(limiter.check("ratelimit:users:findById:a:b", 5, window).await);

        assert_eq!(limiter.reset("ratelimit:users:findById:a").await, Ok(1));
        assert_eq!(store.len(), 1);
        let survivor = limiter.window_key("ratelimit:users:findById:a:b", window);
        assert_eq!(store.get(&survivor), Some(1));
    }

    #[test]
    fn test_window_key_match_is_exact() {
        assert!(is_window_of("k", "k:29000000"));
        assert!(!is_window_of("k", "k:b:29000000"));
        assert!(!is_window_of("k", "k:"));
        assert!(!is_window_of("k", "kk:1"));
    }

    #[test]
    fn test_rate_limit_key_format() {
        let key = RateLimitKey::for_operation(Resource::Users, Operation::FindById, "u1");
        assert_eq!(key.as_str(), "ratelimit:users:findById:u1");
        let key = RateLimitKey::for_operation(
            Resource::Units,
            Operation::FindMany("getRooms"),
            "u2",
        );
        assert_eq!(key.to_string(), "ratelimit:units:getRooms:u2");
    }

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn incr(&self, _key: &str) -> Result<i64, CounterStoreError> {
            Err(CounterStoreError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, CounterStoreError> {
            Ok(false)
        }
        async fn keys(&self, _pattern: &str) -> Result<Vec<String>, CounterStoreError> {
            Ok(Vec::new())
        }
        async fn del(&self, _keys: &[String]) -> Result<u64, CounterStoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(DownStore), Arc::new(ManualClock::default()));
        for _ in 0..5 {
            assert!(limiter.check("k", 1, Duration::from_secs(1)).await);
        }
    }
}

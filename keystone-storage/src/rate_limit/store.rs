//! Counter store abstraction and the in-process implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use keystone_core::{Clock, CounterStoreError};

/// Shared key/counter store backing the rate limiter.
///
/// Implementations must make `incr` atomic: concurrent increments of the same
/// key never lose an update.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` (created at 0 if absent) and return the new count.
    async fn incr(&self, key: &str) -> Result<i64, CounterStoreError>;

    /// Set `key` to expire after `ttl`. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CounterStoreError>;

    /// Keys matching a glob pattern (`*` any run, `?` one char, `\` escapes).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CounterStoreError>;

    /// Delete keys. Returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, CounterStoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: i64,
    expires_at_ms: Option<i64>,
}

impl Counter {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

/// Single-process counter store. Expiry is applied lazily on access and by
/// [`purge_expired`](Self::purge_expired).
#[derive(Debug)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, Counter>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Current count of `key`, if live.
    pub fn get(&self, key: &str) -> Option<i64> {
        let now = self.clock.now_ms();
        self.counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.count)
    }

    /// Drop expired counters. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.counters.len();
        self.counters.retain(|_, c| !c.is_expired(now));
        before.saturating_sub(self.counters.len())
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64, CounterStoreError> {
        let now = self.clock.now_ms();
        // The entry guard holds the shard lock for the read-modify-write.
        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at_ms: None,
        });
        if entry.is_expired(now) {
            *entry = Counter {
                count: 0,
                expires_at_ms: None,
            };
        }
        entry.count = entry.count.saturating_add(1);
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CounterStoreError> {
        let now = self.clock.now_ms();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        match self.counters.get_mut(key) {
            Some(mut counter) if !counter.is_expired(now) => {
                counter.expires_at_ms = Some(now.saturating_add(ttl_ms));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CounterStoreError> {
        let trailing_escapes = pattern.chars().rev().take_while(|c| *c == '\\').count();
        if pattern.is_empty() || trailing_escapes % 2 == 1 {
            return Err(CounterStoreError::InvalidPattern {
                pattern: pattern.to_string(),
            });
        }
        let now = self.clock.now_ms();
        let mut keys: Vec<String> = self
            .counters
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CounterStoreError> {
        let now = self.clock.now_ms();
        let mut removed = 0;
        for key in keys {
            if let Some((_, counter)) = self.counters.remove(key) {
                if !counter.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// Escape glob metacharacters so `literal` matches only itself.
pub fn glob_escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Match `text` against a glob supporting `*`, `?` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Lit(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => Token::Any,
            '?' => Token::One,
            '\\' => Token::Lit(chars.next().unwrap_or('\\')),
            other => Token::Lit(other),
        });
    }
    let text: Vec<char> = text.chars().collect();

    // Iterative wildcard matching with single-star backtracking.
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(Token::One) => {
                p += 1;
                t += 1;
            }
            Some(Token::Lit(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            Some(Token::Any) => {
                star = Some((p, t));
                p += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| *token == Token::Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::ManualClock;

    fn store() -> (InMemoryCounterStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (InMemoryCounterStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_incr_and_expire() {
        let (store, clock) = store();
        assert_eq!(store.incr("k").await, Ok(1));
        assert_eq!(store.incr("k").await, Ok(2));
        assert_eq!(store.expire("k", Duration::from_millis(100)).await, Ok(true));
        assert_eq!(store.expire("absent", Duration::from_millis(100)).await, Ok(false));

        clock.advance(Duration::from_millis(100));
        assert_eq!(store.get("k"), None);
        assert_eq!(store.incr("k").await, Ok(1));
    }

    #[tokio::test]
    async fn test_keys_and_del() {
        let (store, _) = store();
        for key in ["rl:a:1", "rl:a:2", "rl:b:1"] {
            assert!(store.incr(key).await.is_ok());
        }
        let keys = store.keys("rl:a:*").await.unwrap_or_default();
        assert_eq!(keys, vec!["rl:a:1".to_string(), "rl:a:2".to_string()]);
        assert_eq!(store.del(&keys).await, Ok(2));
        assert_eq!(store.len(), 1);
        assert!(store.keys("").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryCounterStore::new(clock));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let _ = store.incr("shared").await;
                }
            }));
        }
        for task in tasks {
            assert!(task.await.is_ok());
        }
        assert_eq!(store.get("shared"), Some(400));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("a:*", "a:1"));
        assert!(glob_match("a:*", "a:"));
        assert!(!glob_match("a:*", "b:1"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("*:9", "x:y:9"));
        assert!(!glob_match("a\\*", "ab"));
        assert!(glob_match("a\\*", "a*"));
        assert!(glob_match(&format!("{}:*", glob_escape("u*1")), "u*1:5"));
        assert!(!glob_match(&format!("{}:*", glob_escape("u*1")), "u21:5"));
    }
}

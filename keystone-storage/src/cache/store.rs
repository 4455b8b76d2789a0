//! Single-namespace TTL cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use keystone_core::{CacheError, CacheNamespace, Clock};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone)]
struct CacheEntry {
    data: JsonValue,
    expires_at_ms: i64,
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Number of entries currently stored (expired ones not yet purged included).
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Key-value cache for one namespace.
///
/// Values are stored serialized so a namespace can hold entities, pages and
/// counts side by side. An entry is never returned once `now >= expires_at`.
#[derive(Debug)]
pub struct CacheStore {
    namespace: CacheNamespace,
    default_ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStore {
    pub fn new(namespace: CacheNamespace, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            namespace,
            default_ttl,
            entries: RwLock::new(HashMap::new()),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn namespace(&self) -> CacheNamespace {
        self.namespace
    }

    /// TTL applied by callers that do not choose one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn poisoned(&self) -> CacheError {
        CacheError::LockPoisoned {
            namespace: self.namespace.to_string(),
        }
    }

    /// Look up `key`. Expired entries are removed and reported as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let now = self.clock.now_ms();
        let found = {
            let entries = self.entries.read().map_err(|_| self.poisoned())?;
            entries.get(key).cloned()
        };

        let entry = match found {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Some(entry) if now >= entry.expires_at_ms => {
                let mut entries = self.entries.write().map_err(|_| self.poisoned())?;
                // Another writer may have refreshed the key in between.
                if entries
                    .get(key)
                    .is_some_and(|current| now >= current.expires_at_ms)
                {
                    entries.remove(key);
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Some(entry) => entry,
        };

        match serde_json::from_value(entry.data) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Serialization {
                    namespace: self.namespace.to_string(),
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Store `data` under `key` until `now + ttl`. Last writer wins.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let data = serde_json::to_value(data).map_err(|e| CacheError::Serialization {
            namespace: self.namespace.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = CacheEntry {
            data,
            expires_at_ms: self.clock.now_ms().saturating_add(ttl_ms),
        };
        self.entries
            .write()
            .map_err(|_| self.poisoned())?
            .insert(key.to_string(), entry);
        Ok(())
    }

    /// Remove one key. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| self.poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    /// Remove every key starting with `prefix`. Returns the number removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().map_err(|_| self.poisoned())?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    /// Drop every entry of this namespace.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().map_err(|_| self.poisoned())?.clear();
        Ok(())
    }

    /// Remove entries whose TTL has elapsed. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().map_err(|_| self.poisoned())?;
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at_ms);
        let purged = before - entries.len();
        self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
        Ok(purged)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }
}

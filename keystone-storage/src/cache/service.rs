//! Cache service: one store per namespace plus lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keystone_core::{CacheNamespace, Clock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::{CacheStats, CacheStore};

/// Configuration for the cache service.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// TTL for namespaces without an override.
    pub default_ttl: Duration,
    /// Per-namespace TTL overrides.
    pub namespace_ttls: HashMap<CacheNamespace, Duration>,
    /// How often the background sweeper purges expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut namespace_ttls = HashMap::new();
        namespace_ttls.insert(CacheNamespace::Finance, Duration::from_secs(60));
        Self {
            default_ttl: Duration::from_secs(300),
            namespace_ttls,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Override the TTL of one namespace.
    pub fn with_namespace_ttl(mut self, namespace: CacheNamespace, ttl: Duration) -> Self {
        self.namespace_ttls.insert(namespace, ttl);
        self
    }

    /// Set the sweeper interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn ttl_for(&self, namespace: CacheNamespace) -> Duration {
        self.namespace_ttls
            .get(&namespace)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

/// Owns the namespace stores. Built once at start-up and shared.
#[derive(Debug)]
pub struct CacheService {
    user: Arc<CacheStore>,
    development: Arc<CacheStore>,
    unit: Arc<CacheStore>,
    sale: Arc<CacheStore>,
    document: Arc<CacheStore>,
    finance: Arc<CacheStore>,
    config: CacheConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheService {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let store = |ns: CacheNamespace| {
            Arc::new(CacheStore::new(ns, config.ttl_for(ns), Arc::clone(&clock)))
        };
        Self {
            user: store(CacheNamespace::User),
            development: store(CacheNamespace::Development),
            unit: store(CacheNamespace::Unit),
            sale: store(CacheNamespace::Sale),
            document: store(CacheNamespace::Document),
            finance: store(CacheNamespace::Finance),
            config,
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store for one namespace.
    pub fn namespace(&self, namespace: CacheNamespace) -> Arc<CacheStore> {
        let store = match namespace {
            CacheNamespace::User => &self.user,
            CacheNamespace::Development => &self.development,
            CacheNamespace::Unit => &self.unit,
            CacheNamespace::Sale => &self.sale,
            CacheNamespace::Document => &self.document,
            CacheNamespace::Finance => &self.finance,
        };
        Arc::clone(store)
    }

    fn stores(&self) -> [Arc<CacheStore>; 6] {
        [
            Arc::clone(&self.user),
            Arc::clone(&self.development),
            Arc::clone(&self.unit),
            Arc::clone(&self.sale),
            Arc::clone(&self.document),
            Arc::clone(&self.finance),
        ]
    }

    /// Empty every namespace.
    pub fn clear_all(&self) {
        for store in self.stores() {
            if let Err(e) = store.clear() {
                warn!(namespace = %store.namespace(), error = %e, "Failed to clear cache namespace");
            }
        }
    }

    /// Purge expired entries in every namespace. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.stores())
    }

    /// Per-namespace statistics.
    pub fn stats(&self) -> Vec<(CacheNamespace, CacheStats)> {
        self.stores()
            .iter()
            .map(|store| (store.namespace(), store.stats()))
            .collect()
    }

    /// Start the background sweeper on the current tokio runtime.
    ///
    /// Returns `false` when no runtime is available, a sweeper already runs,
    /// or the configured interval is zero.
    pub fn spawn_sweeper(&self) -> bool {
        let every = self.config.sweep_interval;
        if every.is_zero() {
            warn!("Cache sweep interval is zero; cache sweeper not started");
            return false;
        }
        let Ok(mut slot) = self.sweeper.lock() else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; cache sweeper not started");
            return false;
        };

        let stores = self.stores();
        *slot = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = purge(&stores);
                if purged > 0 {
                    debug!(purged, "Cache sweeper purged expired entries");
                }
            }
        }));
        info!(interval_ms = every.as_millis() as u64, "Cache sweeper started");
        true
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the sweeper and drop all cached data.
    pub fn shutdown(&self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.clear_all();
        info!("Cache service shut down");
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

fn purge(stores: &[Arc<CacheStore>]) -> usize {
    stores
        .iter()
        .map(|store| match store.purge_expired() {
            Ok(n) => n,
            Err(e) => {
                warn!(namespace = %store.namespace(), error = %e, "Failed to purge cache namespace");
                0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::ManualClock;

    fn service() -> (CacheService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (CacheService::new(CacheConfig::default(), clock.clone()), clock)
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let (service, _) = service();
        let ttl = Duration::from_secs(10);
        assert!(service.namespace(CacheNamespace::User).set("id:1", &"user", ttl).is_ok());
        assert_eq!(
            service.namespace(CacheNamespace::Unit).get::<String>("id:1"),
            Ok(None)
        );
        assert_eq!(
            service.namespace(CacheNamespace::User).get::<String>("id:1"),
            Ok(Some("user".to_string()))
        );
    }

    #[test]
    fn test_finance_ttl_is_shorter() {
        let (service, _) = service();
        assert_eq!(
            service.namespace(CacheNamespace::Finance).default_ttl(),
            Duration::from_secs(60)
        );
        assert_eq!(
            service.namespace(CacheNamespace::Sale).default_ttl(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_clear_all_and_purge() {
        let (service, clock) = service();
        let sale = service.namespace(CacheNamespace::Sale);
        assert!(sale.set("a", &1_u8, Duration::from_millis(5)).is_ok());
        assert!(sale.set("b", &1_u8, Duration::from_secs(5)).is_ok());
        clock.advance(Duration::from_millis(10));
        assert_eq!(service.purge_expired(), 1);
        service.clear_all();
        assert!(sale.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_lifecycle() {
        let clock = Arc::new(ManualClock::default());
        let service = CacheService::new(
            CacheConfig::default().with_sweep_interval(Duration::from_millis(10)),
            clock,
        );
        assert!(service.spawn_sweeper());
        assert!(!service.spawn_sweeper());
        assert!(service.sweeper_running());
        service.shutdown();
        assert!(!service.sweeper_running());
    }

    #[tokio::test]
    async fn test_zero_sweep_interval_is_refused() {
        let service = CacheService::new(
            CacheConfig::default().with_sweep_interval(Duration::ZERO),
            Arc::new(ManualClock::default()),
        );
        assert!(!service.spawn_sweeper());
        assert!(!service.sweeper_running());
    }

    #[test]
    fn test_sweeper_needs_runtime() {
        let (service, _) = service();
        assert!(!service.spawn_sweeper());
    }
}

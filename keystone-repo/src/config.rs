//! Layer Configuration Module
//!
//! Cache TTLs, rate limits and audit buffering, loaded from environment
//! variables with defaults suitable for development.

use std::str::FromStr;
use std::time::Duration;

use keystone_core::{CacheNamespace, ConfigError, Operation, RateLimit, RateLimitPolicy};
use keystone_storage::CacheConfig;
use tracing::warn;

/// Base operations configurable through `KEYSTONE_RATE_LIMIT_<NAME>`.
const OPERATION_VARS: &[(Operation, &str)] = &[
    (Operation::FindById, "FIND_BY_ID"),
    (Operation::FindAll, "FIND_ALL"),
    (Operation::Create, "CREATE"),
    (Operation::Update, "UPDATE"),
    (Operation::Delete, "DELETE"),
];

/// Configuration of the data layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerConfig {
    pub cache: CacheConfig,
    pub rate_limits: RateLimitPolicy,
    /// Capacity of the in-memory audit buffer, when one is used.
    pub audit_capacity: usize,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            rate_limits: RateLimitPolicy::default(),
            audit_capacity: 10_000,
        }
    }
}

impl LayerConfig {
    /// Create LayerConfig from environment variables, falling back to the
    /// defaults when any value is invalid.
    ///
    /// Environment variables:
    /// - `KEYSTONE_CACHE_TTL_SECS`: Default cache TTL (default: 300)
    /// - `KEYSTONE_CACHE_TTL_<NAMESPACE>_SECS`: Per-namespace TTL, e.g. `..._FINANCE_SECS` (default: 60 for finance)
    /// - `KEYSTONE_CACHE_SWEEP_SECS`: Expired-entry sweep interval (default: 60)
    /// - `KEYSTONE_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `KEYSTONE_RATE_LIMIT_<OPERATION>`: `max/window_ms` for FIND_BY_ID, FIND_ALL, CREATE, UPDATE, DELETE
    /// - `KEYSTONE_RATE_LIMIT_OVERRIDES`: Comma-separated `name=max/window_ms` for named finders
    /// - `KEYSTONE_AUDIT_CAPACITY`: In-memory audit buffer size (default: 10000)
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid layer configuration; using defaults");
            Self::default()
        })
    }

    /// Like [`from_env`](Self::from_env) but reports the first invalid value.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let mut cache = defaults.cache.clone();
        if let Some(secs) = parse_var::<u64, _>(&lookup, "KEYSTONE_CACHE_TTL_SECS")? {
            cache.default_ttl = Duration::from_secs(secs);
        }
        for namespace in CacheNamespace::ALL {
            let key = format!(
                "KEYSTONE_CACHE_TTL_{}_SECS",
                namespace.as_str().to_ascii_uppercase()
            );
            if let Some(secs) = parse_var::<u64, _>(&lookup, &key)? {
                cache.namespace_ttls.insert(*namespace, Duration::from_secs(secs));
            }
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "KEYSTONE_CACHE_SWEEP_SECS")? {
            if secs == 0 {
                return Err(invalid("KEYSTONE_CACHE_SWEEP_SECS", "0", "must be positive"));
            }
            cache.sweep_interval = Duration::from_secs(secs);
        }

        let mut rate_limits = defaults.rate_limits.clone();
        if let Some(raw) = lookup("KEYSTONE_RATE_LIMIT_ENABLED") {
            rate_limits.enabled = parse_bool("KEYSTONE_RATE_LIMIT_ENABLED", &raw)?;
        }
        for (operation, suffix) in OPERATION_VARS {
            let key = format!("KEYSTONE_RATE_LIMIT_{suffix}");
            if let Some(limit) = parse_limit(&lookup, &key)? {
                rate_limits.set_limit(operation.name(), limit);
            }
        }
        if let Some(raw) = lookup("KEYSTONE_RATE_LIMIT_OVERRIDES") {
            for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let (name, limit) = entry.split_once('=').ok_or_else(|| {
                    invalid("KEYSTONE_RATE_LIMIT_OVERRIDES", entry, "expected name=max/window_ms")
                })?;
                let limit = RateLimit::from_str(limit).map_err(|_| {
                    invalid("KEYSTONE_RATE_LIMIT_OVERRIDES", entry, "expected name=max/window_ms")
                })?;
                rate_limits.set_limit(name.trim(), limit);
            }
        }

        let audit_capacity = parse_var::<usize, _>(&lookup, "KEYSTONE_AUDIT_CAPACITY")?
            .unwrap_or(defaults.audit_capacity);
        if audit_capacity == 0 {
            return Err(invalid("KEYSTONE_AUDIT_CAPACITY", "0", "must be positive"));
        }

        Ok(Self {
            cache,
            rate_limits,
            audit_capacity,
        })
    }

    pub fn ttl_for(&self, namespace: CacheNamespace) -> Duration {
        self.cache.ttl_for(namespace)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, &raw, "must be a non-negative integer")),
    }
}

fn parse_limit<F>(lookup: &F, key: &str) -> Result<Option<RateLimit>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => RateLimit::from_str(&raw)
            .map(Some)
            .map_err(|_| invalid(key, &raw, "expected max/window_ms")),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected true or false")),
    }
}

//! Rate-limit policy types

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Operation};

/// Fixed-window limit: at most `max` calls per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }

    pub fn per_minute(max: u32) -> Self {
        Self::new(max, Duration::from_secs(60))
    }

    /// Window length in milliseconds, never zero.
    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX).max(1)
    }
}

impl FromStr for RateLimit {
    type Err = ConfigError;

    /// Parses `"<max>/<window_ms>"`, e.g. `"100/60000"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            field: "rate_limit".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let (max, window) = s
            .split_once('/')
            .ok_or_else(|| invalid("expected <max>/<window_ms>"))?;
        let max: u32 = max
            .trim()
            .parse()
            .map_err(|_| invalid("max must be a non-negative integer"))?;
        let window_ms: u64 = window
            .trim()
            .parse()
            .map_err(|_| invalid("window_ms must be a positive integer"))?;
        if window_ms == 0 {
            return Err(invalid("window_ms must be a positive integer"));
        }
        Ok(Self::new(max, Duration::from_millis(window_ms)))
    }
}

/// Per-operation limits keyed by operation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub enabled: bool,
    limits: HashMap<String, RateLimit>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert(Operation::FindById.name().to_string(), RateLimit::per_minute(100));
        limits.insert(Operation::FindAll.name().to_string(), RateLimit::per_minute(50));
        limits.insert(Operation::Create.name().to_string(), RateLimit::per_minute(20));
        limits.insert(Operation::Update.name().to_string(), RateLimit::per_minute(20));
        limits.insert(Operation::Delete.name().to_string(), RateLimit::per_minute(10));
        Self {
            enabled: true,
            limits,
        }
    }
}

impl RateLimitPolicy {
    /// Policy that never limits.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Override or add the limit for an operation name.
    pub fn with_limit(mut self, operation: &str, limit: RateLimit) -> Self {
        self.set_limit(operation, limit);
        self
    }

    pub fn set_limit(&mut self, operation: &str, limit: RateLimit) {
        self.limits.insert(operation.to_string(), limit);
    }

    /// Limit for an operation: its own entry, else its class default.
    pub fn limit_for(&self, operation: Operation) -> RateLimit {
        self.limits
            .get(operation.name())
            .or_else(|| self.limits.get(operation.limit_class().name()))
            .copied()
            .unwrap_or_else(|| RateLimit::per_minute(100))
    }
}

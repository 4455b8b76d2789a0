//! Prometheus Metrics Definitions
//!
//! Metrics live in a [`Registry`] owned by the data layer rather than the
//! process-global default registry, so several layers (and tests) can coexist.

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};

/// Repository operation latency buckets (seconds)
/// Covers: 0.5ms, 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s
const OPERATION_LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5,
];

/// Container for all Keystone metrics.
#[derive(Clone)]
pub struct LayerMetrics {
    registry: Registry,

    /// Repository operations - labels: operation, resource, status
    pub operations_total: CounterVec,

    /// Repository operation duration - labels: operation, resource
    pub operation_duration_seconds: HistogramVec,

    /// Cache lookups - labels: namespace, result (hit/miss/error)
    pub cache_lookups_total: CounterVec,

    /// Rate limit rejections - labels: resource, operation
    pub rate_limit_rejections_total: CounterVec,

    /// Audit events a sink failed to record
    pub audit_dropped_total: IntCounter,
}

impl std::fmt::Debug for LayerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerMetrics").finish_non_exhaustive()
    }
}

impl LayerMetrics {
    /// Create all metrics and register them with a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations_total = CounterVec::new(
            Opts::new(
                "keystone_repo_operations_total",
                "Total number of repository operations",
            ),
            &["operation", "resource", "status"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "keystone_repo_operation_duration_seconds",
                "Repository operation duration in seconds",
            )
            .buckets(OPERATION_LATENCY_BUCKETS.to_vec()),
            &["operation", "resource"],
        )?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        let cache_lookups_total = CounterVec::new(
            Opts::new("keystone_cache_lookups_total", "Total number of cache lookups"),
            &["namespace", "result"],
        )?;
        registry.register(Box::new(cache_lookups_total.clone()))?;

        let rate_limit_rejections_total = CounterVec::new(
            Opts::new(
                "keystone_rate_limit_rejections_total",
                "Total number of calls rejected by the rate limiter",
            ),
            &["resource", "operation"],
        )?;
        registry.register(Box::new(rate_limit_rejections_total.clone()))?;

        let audit_dropped_total = IntCounter::new(
            "keystone_audit_dropped_total",
            "Total number of audit events a sink failed to record",
        )?;
        registry.register(Box::new(audit_dropped_total.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            operation_duration_seconds,
            cache_lookups_total,
            rate_limit_rejections_total,
            audit_dropped_total,
        })
    }

    /// Record a finished repository operation.
    pub fn record_operation(
        &self,
        operation: &str,
        resource: &str,
        success: bool,
        duration_secs: f64,
    ) {
        let status = if success { "success" } else { "failure" };
        self.operations_total
            .with_label_values(&[operation, resource, status])
            .inc();
        self.operation_duration_seconds
            .with_label_values(&[operation, resource])
            .observe(duration_secs);
    }

    /// Record a cache lookup outcome: `hit`, `miss` or `error`.
    pub fn record_cache_lookup(&self, namespace: &str, result: &str) {
        self.cache_lookups_total
            .with_label_values(&[namespace, result])
            .inc();
    }

    pub fn record_rate_limited(&self, resource: &str, operation: &str) {
        self.rate_limit_rejections_total
            .with_label_values(&[resource, operation])
            .inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every metric in the registry.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_layers_do_not_collide() {
        assert!(LayerMetrics::new().is_ok());
        assert!(LayerMetrics::new().is_ok());
    }

    #[test]
    fn test_render_contains_recorded_series() -> Result<(), prometheus::Error> {
        let metrics = LayerMetrics::new()?;
        metrics.record_operation("findById", "users", true, 0.002);
        metrics.record_cache_lookup("user", "hit");
        metrics.record_rate_limited("users", "findById");
        metrics.audit_dropped_total.inc();

        let text = metrics.render();
        assert!(text.contains("keystone_repo_operations_total"));
        assert!(text.contains("status=\"success\""));
        assert!(text.contains("keystone_cache_lookups_total"));
        assert!(text.contains("keystone_rate_limit_rejections_total"));
        assert!(text.contains("keystone_audit_dropped_total 1"));
        Ok(())
    }
}

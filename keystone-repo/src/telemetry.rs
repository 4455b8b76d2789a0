//! Tracing Subscriber Initialization
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! JSON or a human-readable `fmt` layer. Audit events arrive on the
//! `keystone::audit` target and can be filtered independently.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "keystone".to_string(),
            default_filter: "keystone_repo=info,keystone_storage=info,keystone::audit=info,warn"
                .to_string(),
            format: LogFormat::Json,
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `KEYSTONE_SERVICE_NAME` (default: keystone)
    /// - `KEYSTONE_LOG_FILTER`: filter used when `RUST_LOG` is unset
    /// - `KEYSTONE_LOG_FORMAT`: "json" or "pretty" (default: json)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("KEYSTONE_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            default_filter: std::env::var("KEYSTONE_LOG_FILTER")
                .unwrap_or(defaults.default_filter),
            format: std::env::var("KEYSTONE_LOG_FORMAT")
                .ok()
                .map(|s| {
                    if s.eq_ignore_ascii_case("pretty") {
                        LogFormat::Pretty
                    } else {
                        LogFormat::Json
                    }
                })
                .unwrap_or(defaults.format),
        }
    }
}

/// Install the global subscriber.
///
/// Call once at startup. A second call fails because a global subscriber is
/// already set; callers that may race (tests) can ignore the error.
pub fn init_tracing(
    config: &TelemetryConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?,
    }

    tracing::info!(
        service_name = %config.service_name,
        format = ?config.format,
        "Telemetry initialized"
    );
    Ok(())
}

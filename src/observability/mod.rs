// src/observability/mod.rs
//! Logging and metrics setup
//!
//! - **Tracing**: `tracing-subscriber` with an `EnvFilter`; plain or JSON output
//! - **Metrics**: `metrics` facade, optionally exported via Prometheus

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Metric names emitted by the engine
pub mod metric_names {
    /// Executions by outcome (`outcome` label)
    pub const EXECUTIONS_TOTAL: &str = "functions_executions_total";

    pub const EXECUTION_DURATION_SECONDS: &str = "functions_execution_duration_seconds";

    pub const POOL_IDLE_ENGINES: &str = "functions_pool_idle_engines";

    pub const ENGINES_CREATED_TOTAL: &str = "functions_engines_created_total";

    pub const ENGINES_DISPOSED_TOTAL: &str = "functions_engines_disposed_total";

    pub const GATE_ACTIVE: &str = "functions_gate_active";

    /// Results degraded to a string rendering
    pub const MARSHALING_FALLBACKS_TOTAL: &str = "functions_marshaling_fallbacks_total";
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides `config.level` when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| EngineError::ObservabilityError(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    installed.map_err(|e| EngineError::ObservabilityError(e.to_string()))
}

/// Install the Prometheus exporter when enabled
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| EngineError::ObservabilityError(format!("invalid metrics address: {}", e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::ObservabilityError(e.to_string()))?;

    describe_metrics();
    info!("Prometheus metrics listening on {}", addr);

    Ok(())
}

fn describe_metrics() {
    use metric_names::*;

    metrics::describe_counter!(EXECUTIONS_TOTAL, "Script executions by outcome");
    metrics::describe_histogram!(
        EXECUTION_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Wall time from rent to result"
    );
    metrics::describe_gauge!(POOL_IDLE_ENGINES, "Engines waiting in the idle reserve");
    metrics::describe_counter!(ENGINES_CREATED_TOTAL, "Engines constructed");
    metrics::describe_counter!(ENGINES_DISPOSED_TOTAL, "Engines disposed");
    metrics::describe_gauge!(GATE_ACTIVE, "Executions holding a concurrency slot");
    metrics::describe_counter!(
        MARSHALING_FALLBACKS_TOTAL,
        "Results that could not be serialized and were rendered as strings"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_is_noop() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_metrics_address() {
        let config = MetricsConfig {
            enabled: true,
            listen: "nowhere".to_string(),
        };
        assert!(init_metrics(&config).is_err());
    }
}

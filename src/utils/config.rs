// src/utils/config.rs
//! Engine configuration
//!
//! Loaded in layers with the `config` crate:
//!
//! 1. Built-in defaults
//! 2. `config/functions.{toml,yaml,json}` (optional)
//! 3. `FUNCTIONS__<SECTION>__<KEY>` environment variables
//!
//! Example: `FUNCTIONS__GATE__MAX_CONCURRENT=32`

use crate::runtime::limits::EngineLimits;
use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the optional configuration file (extension inferred)
pub const DEFAULT_CONFIG_PATH: &str = "config/functions";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub limits: EngineLimits,
    pub gate: GateConfig,
    pub execution: ExecutionConfig,
    pub functions: FunctionsConfig,
    pub http_client: HttpClientConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// HTTP trigger server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Engine pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Ceiling on idle engines kept in reserve (not a cap on active engines)
    pub max_pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_pool_size: 10 }
    }
}

/// Concurrency gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum concurrently active executions system-wide
    pub max_concurrent: usize,

    /// How long a caller may queue for a slot
    pub acquire_timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            acquire_timeout_ms: 10_000,
        }
    }
}

impl GateConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Per-call execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Default script timeout; functions may override it
    pub timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where tenant functions are loaded from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionsConfig {
    pub directory: PathBuf,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("functions"),
        }
    }
}

/// Outbound HTTP adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl HttpClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Prometheus exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9090".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default file location and environment
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file (optional) and environment
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("FUNCTIONS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.limits.validate().map_err(EngineError::ConfigError)?;

        if self.gate.max_concurrent == 0 {
            return Err(EngineError::ConfigError(
                "gate.max_concurrent must be at least 1".to_string(),
            ));
        }

        if self.execution.timeout_ms == 0 {
            return Err(EngineError::ConfigError(
                "execution.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.metrics.enabled {
            self.metrics_addr()?;
        }

        self.server_addr()?;

        Ok(())
    }

    /// Socket address of the HTTP trigger server
    pub fn server_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| EngineError::ConfigError(format!("invalid server address: {}", e)))
    }

    /// Socket address of the Prometheus listener
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics
            .listen
            .parse()
            .map_err(|e| EngineError::ConfigError(format!("invalid metrics address: {}", e)))
    }
}

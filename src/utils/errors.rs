// src/utils/errors.rs
//! Error types for the functions engine
//!
//! `Timeout`, `ScriptFault` and `Cancelled` are the recoverable outcomes of a
//! single execution. Callers turn them into tenant-visible responses. The
//! engine that produced them has always been released by the time the error
//! reaches the caller.

use crate::host::HostError;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the functions engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine pool has been torn down; do not retry against it
    #[error("engine pool has been disposed")]
    PoolDisposed,

    /// Execution exceeded its configured duration
    #[error("script execution timed out after {0:?}")]
    Timeout(Duration),

    /// The script raised or threw; carries the engine diagnostic verbatim
    #[error("script fault: {0}")]
    ScriptFault(String),

    /// The caller's cancellation signal fired before completion
    #[error("execution cancelled")]
    Cancelled,

    /// No concurrency slot freed up within the queue timeout
    #[error("timed out after {0:?} waiting for an execution slot")]
    GateTimeout(Duration),

    /// The concurrency gate no longer hands out slots
    #[error("concurrency gate is closed")]
    GateClosed,

    #[error("failed to create script engine: {0}")]
    EngineCreation(String),

    #[error("function not found: {0}")]
    FunctionNotFound(String),

    #[error("function is disabled: {0}")]
    FunctionDisabled(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("observability setup failed: {0}")]
    ObservabilityError(String),
}

impl EngineError {
    /// Whether the same call may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Timeout(_) | EngineError::GateTimeout(_))
    }

    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::PoolDisposed => "pool_disposed",
            EngineError::Timeout(_) => "timeout",
            EngineError::ScriptFault(_) => "script_fault",
            EngineError::Cancelled => "cancelled",
            EngineError::GateTimeout(_) => "gate_timeout",
            EngineError::GateClosed => "gate_closed",
            EngineError::EngineCreation(_) => "engine_creation",
            EngineError::FunctionNotFound(_) => "function_not_found",
            EngineError::FunctionDisabled(_) => "function_disabled",
            EngineError::ConfigError(_) => "config",
            EngineError::Host(_) => "host",
            EngineError::Io(_) => "io",
            EngineError::Serialization(_) => "serialization",
            EngineError::ServerError(_) => "server",
            EngineError::ObservabilityError(_) => "observability",
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

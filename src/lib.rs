// src/lib.rs
//! Functions Engine Library
//!
//! This library runs administrator-authored tenant scripts inside pooled,
//! isolated QuickJS engines under a global concurrency cap, with timeout
//! enforcement and engine-independent result extraction.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **runtime**: Engines, the dispose-and-replace pool, the concurrency
//!   gate, the execution coordinator and result marshaling
//! - **host**: Host API surface bound into each execution (platform API,
//!   outbound HTTP, email, current identity)
//! - **functions**: Tenant function registry and invocation service
//! - **server**: HTTP trigger front-end
//! - **observability**: Tracing and metrics setup
//! - **utils**: Configuration and error types

// Public module exports
pub mod functions;
pub mod host;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod utils;

// Re-export commonly used types
pub use functions::{FunctionRegistry, FunctionService, ServiceConfig, TenantFunction};
pub use host::{HostBindingSet, HostServices, Identity};
pub use runtime::{
    ConcurrencyGate, EnginePool, EnginePoolConfig, ExecutionCoordinator, ExecutionResult,
    ResultKind, StructuredResult,
};
pub use server::TriggerServer;
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

// src/functions/service.rs
//! Invocation service
//!
//! ```text
//! get/post/render/run ─► resolve ─► Gate.acquire ─► bind identity
//!                                        │
//!                              Coordinator.execute
//!                                        │
//!                      engine returned ─► Gate.release
//! ```
//!
//! The gate slot travels with the execution request. A caller that gets
//! `Timeout` or `Cancelled` back does not free the slot; the worker frees it
//! once the interrupted engine is back in the pool.

use crate::functions::registry::FunctionRegistry;
use crate::host::{HostServices, Identity};
use crate::runtime::concurrency_gate::ConcurrencyGate;
use crate::runtime::coordinator::{ExecutionCoordinator, ExecutionRequest};
use crate::runtime::result::ExecutionResult;
use crate::utils::config::EngineConfig;
use crate::utils::errors::Result;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Service-level timeouts
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Execution timeout for functions without an override
    pub default_timeout: Duration,

    /// How long an invocation may queue for a gate slot
    pub gate_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            gate_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&EngineConfig> for ServiceConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            default_timeout: config.execution.timeout(),
            gate_timeout: config.gate.acquire_timeout(),
        }
    }
}

enum Invocation<'a> {
    Get {
        query_args: &'a JsonValue,
    },
    Post {
        payload: &'a JsonValue,
        query_args: &'a JsonValue,
    },
    Run {
        payload: &'a JsonValue,
    },
}

impl Invocation<'_> {
    fn style(&self) -> &'static str {
        match self {
            Invocation::Get { .. } => "get",
            Invocation::Post { .. } => "post",
            Invocation::Run { .. } => "run",
        }
    }
}

/// Runs registered functions under the concurrency gate
pub struct FunctionService {
    registry: Arc<FunctionRegistry>,
    gate: Arc<ConcurrencyGate>,
    coordinator: ExecutionCoordinator,
    host: HostServices,
    config: ServiceConfig,
}

impl FunctionService {
    pub fn new(
        registry: Arc<FunctionRegistry>,
        gate: Arc<ConcurrencyGate>,
        coordinator: ExecutionCoordinator,
        host: HostServices,
        config: ServiceConfig,
    ) -> Self {
        Self {
            registry,
            gate,
            coordinator,
            host,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// HTTP GET trigger: `get(queryArgs)`
    pub async fn get(
        &self,
        name: &str,
        query_args: &JsonValue,
        identity: &Identity,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionResult> {
        self.invoke(name, Invocation::Get { query_args }, identity, cancellation)
            .await
    }

    /// HTTP POST trigger: `post(payload, queryArgs)`
    pub async fn post(
        &self,
        name: &str,
        payload: &JsonValue,
        query_args: &JsonValue,
        identity: &Identity,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionResult> {
        self.invoke(
            name,
            Invocation::Post {
                payload,
                query_args,
            },
            identity,
            cancellation,
        )
        .await
    }

    /// Template rendering: `get(args)` as text
    pub async fn render(
        &self,
        name: &str,
        args: &JsonValue,
        identity: &Identity,
        cancellation: &CancellationToken,
    ) -> Result<String> {
        self.get(name, args, identity, cancellation)
            .await
            .map(|result| result.render_text())
    }

    /// Internal trigger: `run(payload)`, awaiting completion
    pub async fn run(
        &self,
        name: &str,
        payload: &JsonValue,
        identity: &Identity,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        self.invoke(name, Invocation::Run { payload }, identity, cancellation)
            .await
            .map(|_| ())
    }

    /// Fire-and-forget internal trigger; the outcome is only logged
    pub fn trigger(self: &Arc<Self>, name: &str, payload: JsonValue, identity: Identity) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let name = name.to_string();

        tokio::spawn(async move {
            let cancellation = CancellationToken::new();
            match service.run(&name, &payload, &identity, &cancellation).await {
                Ok(()) => info!(function = %name, "Triggered function completed"),
                Err(e) => error!(function = %name, error = %e, "Triggered function failed"),
            }
        })
    }

    /// Stop admitting work, let in-flight executions return their engines,
    /// then dispose the engine pool
    ///
    /// Waits at most `default_timeout` for the gate to drain.
    pub async fn shutdown(&self) {
        self.gate.close();

        let drained = tokio::time::timeout(self.config.default_timeout, async {
            while self.gate.active() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(in_flight = self.gate.active(), "Shutting down with executions still running");
        }

        self.coordinator.pool().teardown();
    }

    async fn invoke(
        &self,
        name: &str,
        invocation: Invocation<'_>,
        identity: &Identity,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let function = self.registry.resolve(name)?;
        let timeout = function.timeout.unwrap_or(self.config.default_timeout);

        debug!(
            function = %name,
            style = invocation.style(),
            timeout_ms = timeout.as_millis() as u64,
            "Invoking function"
        );

        let permit = self.gate.acquire(self.config.gate_timeout, cancellation).await?;
        let bindings = self.host.bind(identity);
        let code = function.code.as_str();

        let discard = matches!(invocation, Invocation::Run { .. });
        let request = match invocation {
            Invocation::Get { query_args } => {
                ExecutionRequest::get(code, &query_args.to_string(), timeout)
            }
            Invocation::Post {
                payload,
                query_args,
            } => ExecutionRequest::post(code, &payload.to_string(), &query_args.to_string(), timeout),
            Invocation::Run { payload } => ExecutionRequest::run(code, &payload.to_string(), timeout),
        };

        let request = request
            .with_cancellation(cancellation.clone())
            .with_admission(permit);

        let outcome = self.coordinator.execute(request, bindings).await;
        if discard {
            outcome.map(|_| ExecutionResult::Empty)
        } else {
            outcome
        }
    }
}

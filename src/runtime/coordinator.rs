// src/runtime/coordinator.rs
//! Execution coordinator
//!
//! Drives one script execution from rent to release:
//!
//! ```text
//! Idle ─► EngineAcquired ─► Bound ─► Running ─┬─► Completed ─┐
//!                                             ├─► Faulted ───┤
//!                                             ├─► TimedOut ──┼─► EngineReleased
//!                                             └─► Cancelled ─┘
//! ```
//!
//! The engine work runs on a blocking worker so host adapters can drive
//! async operations with `Handle::block_on`. The async side races that
//! worker against the timeout and the caller's cancellation token. When the
//! race is lost the engine is interrupted; the worker then unwinds and hands
//! the engine back to the pool. Release happens on every path, including a
//! panic on the worker.
//!
//! A gate slot attached to the request is held by the worker and freed only
//! after the engine has been returned, so the gate bounds live engines even
//! when a caller gives up early.

use crate::host::binding::bind_host_objects;
use crate::host::HostBindingSet;
use crate::observability::metric_names;
use crate::runtime::concurrency_gate::GatePermit;
use crate::runtime::engine::{InterruptHandle, ScriptEngine};
use crate::runtime::engine_pool::EnginePool;
use crate::runtime::marshal::marshal_result;
use crate::runtime::result::ExecutionResult;
use crate::utils::errors::{EngineError, Result};
use rquickjs::{CatchResultExt, CaughtError, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, trace, warn, Instrument, Span};
use ulid::Ulid;

/// States an execution moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    EngineAcquired,
    Bound,
    Running,
    Completed,
    TimedOut,
    Faulted,
    Cancelled,
    EngineReleased,
}

/// One script execution request
#[derive(Debug)]
pub struct ExecutionRequest {
    /// Tenant script source
    pub code: String,

    /// Expression evaluated after the source, e.g. `get({"q":"1"})`
    pub entrypoint: String,

    pub timeout: Duration,

    pub cancellation: CancellationToken,

    /// Gate slot released once the engine is back in the pool
    pub admission: Option<GatePermit>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, entrypoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            code: code.into(),
            entrypoint: entrypoint.into(),
            timeout,
            cancellation: CancellationToken::new(),
            admission: None,
        }
    }

    /// `get(queryArgs)`
    pub fn get(code: impl Into<String>, query_args: &str, timeout: Duration) -> Self {
        Self::new(code, format!("get({})", query_args), timeout)
    }

    /// `post(payload, queryArgs)`
    pub fn post(code: impl Into<String>, payload: &str, query_args: &str, timeout: Duration) -> Self {
        Self::new(code, format!("post({}, {})", payload, query_args), timeout)
    }

    /// `run(payload)`
    pub fn run(code: impl Into<String>, payload: &str, timeout: Duration) -> Self {
        Self::new(code, format!("run({})", payload), timeout)
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_admission(mut self, permit: GatePermit) -> Self {
        self.admission = Some(permit);
        self
    }
}

/// Runs scripts against engines rented from the pool
#[derive(Clone)]
pub struct ExecutionCoordinator {
    pool: Arc<EnginePool>,
}

impl ExecutionCoordinator {
    pub fn new(pool: Arc<EnginePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<EnginePool> {
        &self.pool
    }

    /// Evaluate `code`, then `entrypoint`, and marshal the settled result
    pub async fn evaluate(
        &self,
        code: &str,
        entrypoint: &str,
        timeout: Duration,
        cancellation: &CancellationToken,
        bindings: HostBindingSet,
    ) -> Result<ExecutionResult> {
        let request = ExecutionRequest::new(code, entrypoint, timeout)
            .with_cancellation(cancellation.clone());
        self.execute(request, bindings).await
    }

    /// Evaluate `get(queryArgs)`
    pub async fn evaluate_as_get(
        &self,
        code: &str,
        query_args: &str,
        timeout: Duration,
        cancellation: &CancellationToken,
        bindings: HostBindingSet,
    ) -> Result<ExecutionResult> {
        let request =
            ExecutionRequest::get(code, query_args, timeout).with_cancellation(cancellation.clone());
        self.execute(request, bindings).await
    }

    /// Evaluate `post(payload, queryArgs)`
    pub async fn evaluate_as_post(
        &self,
        code: &str,
        payload: &str,
        query_args: &str,
        timeout: Duration,
        cancellation: &CancellationToken,
        bindings: HostBindingSet,
    ) -> Result<ExecutionResult> {
        let request = ExecutionRequest::post(code, payload, query_args, timeout)
            .with_cancellation(cancellation.clone());
        self.execute(request, bindings).await
    }

    /// Evaluate `run(payload)`, discarding the returned value
    pub async fn evaluate_as_run(
        &self,
        code: &str,
        payload: &str,
        timeout: Duration,
        cancellation: &CancellationToken,
        bindings: HostBindingSet,
    ) -> Result<()> {
        let request =
            ExecutionRequest::run(code, payload, timeout).with_cancellation(cancellation.clone());
        self.execute(request, bindings).await.map(|_| ())
    }

    /// Execute a prepared request
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        bindings: HostBindingSet,
    ) -> Result<ExecutionResult> {
        let execution_id = Ulid::new();
        let span = info_span!("execution", id = %execution_id);

        async {
            let started = Instant::now();
            let outcome = self.run(request, bindings).await;
            record_outcome(&outcome, started.elapsed());
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: ExecutionRequest, bindings: HostBindingSet) -> Result<ExecutionResult> {
        let ExecutionRequest {
            code,
            entrypoint,
            timeout,
            cancellation,
            admission,
        } = request;

        trace!(state = ?ExecutionState::Idle);
        if cancellation.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let engine = self.pool.rent()?;
        trace!(state = ?ExecutionState::EngineAcquired, engine_id = engine.id());

        let interrupt = InterruptOnDrop::new(engine.interrupt_handle());
        let pool = Arc::clone(&self.pool);
        let handle = Handle::current();
        let span = Span::current();

        let mut worker = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_in_engine(&engine, &code, &entrypoint, bindings, handle)
            }))
            .unwrap_or_else(|payload| {
                Err(EngineError::ScriptFault(format!(
                    "execution worker panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

            pool.return_engine(engine);
            trace!(state = ?ExecutionState::EngineReleased);
            drop(admission);
            outcome
        });

        let outcome = tokio::select! {
            biased;

            joined = &mut worker => match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(EngineError::ScriptFault(format!("execution worker failed: {}", e))),
            },

            _ = tokio::time::sleep(timeout) => {
                trace!(state = ?ExecutionState::TimedOut);
                warn!(timeout_ms = timeout.as_millis() as u64, "Script execution timed out");
                return Err(EngineError::Timeout(timeout));
            }

            _ = cancellation.cancelled() => {
                trace!(state = ?ExecutionState::Cancelled);
                debug!("Script execution cancelled");
                return Err(EngineError::Cancelled);
            }
        };

        // The worker finished on its own; nothing left to interrupt
        interrupt.disarm();

        match &outcome {
            Ok(_) => trace!(state = ?ExecutionState::Completed),
            Err(e) => trace!(state = ?ExecutionState::Faulted, error = %e),
        }

        outcome
    }
}

/// Bind, load, run and marshal inside one engine
fn run_in_engine(
    engine: &ScriptEngine,
    code: &str,
    entrypoint: &str,
    bindings: HostBindingSet,
    handle: Handle,
) -> Result<ExecutionResult> {
    engine.with_context(|ctx| {
        let host_values = bind_host_objects(&ctx, bindings, handle)?;
        trace!(state = ?ExecutionState::Bound);

        ctx.eval::<Value, _>(code)
            .catch(&ctx)
            .map_err(|e| EngineError::ScriptFault(e.to_string()))?;

        trace!(state = ?ExecutionState::Running);
        let returned = ctx
            .eval::<Value, _>(entrypoint)
            .catch(&ctx)
            .map_err(|e| EngineError::ScriptFault(e.to_string()))?;

        let settled = match returned.as_promise().cloned() {
            Some(promise) => match promise.finish::<Value>().catch(&ctx) {
                Ok(settled) => settled,
                // No queued jobs left and no host work can resolve it
                Err(CaughtError::Error(rquickjs::Error::WouldBlock)) => {
                    return Err(EngineError::ScriptFault(
                        "entrypoint returned a promise that never settles".to_string(),
                    ))
                }
                Err(e) => return Err(EngineError::ScriptFault(e.to_string())),
            },
            None => returned,
        };

        Ok(marshal_result(&ctx, settled, &host_values))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Trips the engine interrupt unless disarmed
///
/// Covers the timeout and cancellation branches as well as the caller
/// dropping the execution future.
struct InterruptOnDrop {
    handle: Option<InterruptHandle>,
}

impl InterruptOnDrop {
    fn new(handle: InterruptHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.interrupt();
        }
    }
}

fn record_outcome(outcome: &Result<ExecutionResult>, elapsed: Duration) {
    let label = match outcome {
        Ok(_) => "completed",
        Err(e) => e.kind(),
    };

    metrics::counter!(metric_names::EXECUTIONS_TOTAL, "outcome" => label).increment(1);
    metrics::histogram!(metric_names::EXECUTION_DURATION_SECONDS).record(elapsed.as_secs_f64());

    debug!(
        outcome = label,
        elapsed_ms = elapsed.as_millis() as u64,
        "Execution finished"
    );
}

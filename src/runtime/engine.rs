// src/runtime/engine.rs
//! Script engine lifecycle
//!
//! A `ScriptEngine` is one isolated QuickJS runtime and context:
//! - Construction applies the engine limits, installs the interrupt handler
//!   and loads the fixed prelude (structured result shapes, host installer)
//! - Execution happens through `with_context` on a blocking worker thread
//! - Disposal drops the runtime; an engine is never reset and reused

use crate::runtime::limits::EngineLimits;
use crate::utils::errors::{EngineError, Result};
use rquickjs::{CatchResultExt, Context, Ctx, Runtime, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Source evaluated into every engine at construction
pub(crate) const PRELUDE: &str = include_str!("prelude.js");

/// Handle used to abort a running script from another thread
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Request that the engine stop at its next interrupt checkpoint
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One isolated script execution context
pub struct ScriptEngine {
    /// Unique ID assigned by the pool
    id: u64,

    // Declared before `runtime` so the context is released first
    context: Context,

    runtime: Runtime,

    /// Checked by the engine's interrupt handler
    interrupt: InterruptHandle,

    created_at: Instant,
}

impl ScriptEngine {
    /// Create and configure a new engine
    pub fn new(id: u64, limits: &EngineLimits) -> Result<Self> {
        let started = Instant::now();

        let runtime = Runtime::new()
            .map_err(|e| EngineError::EngineCreation(format!("runtime: {}", e)))?;
        runtime.set_memory_limit(limits.memory_limit_bytes());
        runtime.set_max_stack_size(limits.max_stack_size_bytes());

        let interrupt = InterruptHandle::default();
        let flag = interrupt.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || flag.is_interrupted())));

        let context = Context::full(&runtime)
            .map_err(|e| EngineError::EngineCreation(format!("context: {}", e)))?;

        context.with(|ctx| {
            ctx.eval::<Value, _>(PRELUDE)
                .catch(&ctx)
                .map(|_| ())
                .map_err(|e| EngineError::EngineCreation(format!("prelude: {}", e)))
        })?;

        trace!(engine_id = id, elapsed_us = started.elapsed().as_micros() as u64, "Engine constructed");

        Ok(Self {
            id,
            context,
            runtime,
            interrupt,
            created_at: started,
        })
    }

    /// Engine ID (unique within its pool)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Time since construction
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Handle that aborts whatever this engine is running
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Run `f` inside the engine's context
    pub fn with_context<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R + Send,
        R: Send,
    {
        self.context.with(f)
    }

    /// Bytes currently allocated by the engine's heap
    pub fn memory_used_bytes(&self) -> i64 {
        self.runtime.memory_usage().memory_used_size
    }

    /// Release the engine and everything scripts left in it
    pub fn dispose(self) {
        debug!(
            engine_id = self.id,
            age_ms = self.age().as_millis() as u64,
            memory_used = self.memory_used_bytes(),
            "Disposing engine"
        );
        drop(self);
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("id", &self.id)
            .field("interrupted", &self.interrupt.is_interrupted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ScriptEngine {
        ScriptEngine::new(1, &EngineLimits::default()).unwrap()
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine();
        assert_eq!(engine.id(), 1);
        assert!(!engine.interrupt_handle().is_interrupted());
    }

    #[test]
    fn test_prelude_defines_result_shapes() {
        let engine = engine();
        let tags: Vec<String> = engine.with_context(|ctx| {
            ctx.eval(
                r#"[
                    new JsonResult({}).contentType,
                    new HtmlResult("").contentType,
                    new XmlResult("").contentType,
                    new RedirectResult("/").contentType,
                    new StatusCodeResult(404).contentType,
                ]"#,
            )
            .unwrap()
        });
        assert_eq!(
            tags,
            vec!["application/json", "text/html", "application/xml", "redirectToUrl", "statusCode"]
        );
    }

    #[test]
    fn test_engines_do_not_share_globals() {
        let first = engine();
        let second = ScriptEngine::new(2, &EngineLimits::default()).unwrap();

        first.with_context(|ctx| {
            ctx.eval::<Value, _>("globalThis.leak = 42;").map(|_| ()).unwrap();
        });
        let leaked: bool = second.with_context(|ctx| ctx.eval("typeof leak !== 'undefined'").unwrap());
        assert!(!leaked);
    }

    #[test]
    fn test_interrupt_stops_running_script() {
        let engine = engine();
        engine.interrupt_handle().interrupt();

        let result: std::result::Result<(), String> = engine.with_context(|ctx| {
            ctx.eval::<Value, _>("while (true) {}")
                .catch(&ctx)
                .map(|_| ())
                .map_err(|e| e.to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_memory_limit_faults_script() {
        let engine = ScriptEngine::new(1, &EngineLimits::strict()).unwrap();

        let result: std::result::Result<(), String> = engine.with_context(|ctx| {
            ctx.eval::<Value, _>(
                "const chunks = []; while (true) { chunks.push('x'.repeat(1024 * 1024)); }",
            )
            .catch(&ctx)
            .map(|_| ())
            .map_err(|e| e.to_string())
        });
        assert!(result.is_err());
    }
}

// src/runtime/mod.rs
//! Script execution runtime
//!
//! This module provides the isolated execution environment for tenant
//! functions:
//!
//! - **Engine**: One QuickJS runtime + context with memory/stack limits
//! - **Engine Pool**: Dispose-and-replace reserve of pre-built engines
//! - **Concurrency Gate**: Bounded admission across all executions
//! - **Coordinator**: Rent, bind, run, race timeout/cancel, marshal, release
//! - **Result Marshaling**: Engine values to engine-independent results
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Concurrency Gate (N slots)               │
//! │                           │                              │
//! │                 Execution Coordinator                    │
//! │        ┌──────────────────┼──────────────────┐           │
//! │        │ rent             │ run              │ return    │
//! │        ▼                  ▼                  ▼           │
//! │  ┌───────────┐     ┌─────────────┐    ┌─────────────┐    │
//! │  │ Idle      │ ──► │ Engine +    │ ──►│ dispose +   │    │
//! │  │ reserve   │     │ host objects│    │ build fresh │    │
//! │  └───────────┘     └─────────────┘    └─────────────┘    │
//! │        ▲                                     │           │
//! │        └─────────────────────────────────────┘           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! An engine serves exactly one execution. Whatever a script leaves behind
//! is disposed with its engine.

pub mod concurrency_gate;
pub mod coordinator;
pub mod engine;
pub mod engine_pool;
pub mod limits;
pub(crate) mod marshal;
pub mod result;

// Re-export commonly used types
pub use concurrency_gate::{ConcurrencyGate, GatePermit};
pub use coordinator::{ExecutionCoordinator, ExecutionRequest, ExecutionState};
pub use engine::{InterruptHandle, ScriptEngine};
pub use engine_pool::{EnginePool, EnginePoolConfig, PoolStats};
pub use limits::EngineLimits;
pub use result::{ExecutionResult, ResultKind, StructuredResult};

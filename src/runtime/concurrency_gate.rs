// src/runtime/concurrency_gate.rs
//! Bounded admission for executions
//!
//! The gate caps how many executions run at once, independently of the
//! engine pool's idle reserve. Waiters are served FIFO by the underlying
//! `tokio::sync::Semaphore`; a slot is held by a `GatePermit` and released
//! when the permit is released or dropped.

use crate::observability::metric_names;
use crate::utils::errors::{EngineError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Counting gate bounding concurrent executions
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `max_concurrent` holders
    pub fn new(max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(EngineError::ConfigError(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        })
    }

    /// Wait for a slot
    ///
    /// Fails with `GateTimeout` after `timeout`, `Cancelled` when the token
    /// fires first and `GateClosed` once the gate has been closed.
    pub async fn acquire(
        &self,
        timeout: Duration,
        cancellation: &CancellationToken,
    ) -> Result<GatePermit> {
        let waiting = Arc::clone(&self.semaphore).acquire_owned();

        let permit = tokio::select! {
            biased;

            _ = cancellation.cancelled() => return Err(EngineError::Cancelled),

            outcome = tokio::time::timeout(timeout, waiting) => match outcome {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(EngineError::GateClosed),
                Err(_) => {
                    trace!(timeout_ms = timeout.as_millis() as u64, "Gate wait timed out");
                    return Err(EngineError::GateTimeout(timeout));
                }
            },
        };

        Ok(self.admit(permit))
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Result<Option<GatePermit>> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Some(self.admit(permit))),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(EngineError::GateClosed),
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> GatePermit {
        let permit = GatePermit {
            permit: Some(permit),
            semaphore: Arc::clone(&self.semaphore),
            max_concurrent: self.max_concurrent,
        };
        permit.publish();
        permit
    }

    /// Free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn active(&self) -> usize {
        self.max_concurrent.saturating_sub(self.available())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stop admitting; waiters and later callers get `GateClosed`
    ///
    /// Permits already handed out stay valid until released.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// One admitted slot in the gate
#[derive(Debug)]
pub struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl GatePermit {
    /// Free the slot and wake one waiter
    pub fn release(mut self) {
        self.release_slot();
    }

    fn release_slot(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            self.publish();
        }
    }

    fn publish(&self) {
        let active = self
            .max_concurrent
            .saturating_sub(self.semaphore.available_permits());
        metrics::gauge!(metric_names::GATE_ACTIVE).set(active as f64);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.release_slot();
    }
}

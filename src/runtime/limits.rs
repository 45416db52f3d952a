// src/runtime/limits.rs
//! Resource limits for script engines
//!
//! Applied to every engine the pool constructs:
//! - Heap ceiling (MB), enforced by the engine allocator
//! - Max stack size (KB), bounds runaway recursion

use serde::{Deserialize, Serialize};

/// Resource limits for a single script engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Heap limit in megabytes
    /// Example: 64 = scripts fail with an out-of-memory fault past 64MB
    pub memory_limit_mb: u64,

    /// Max stack size in kilobytes
    pub max_stack_size_kb: u64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 64,
            max_stack_size_kb: 512,
        }
    }
}

impl EngineLimits {
    /// Tight limits for untrusted tenants
    pub fn strict() -> Self {
        Self {
            memory_limit_mb: 16,
            max_stack_size_kb: 256,
        }
    }

    /// Generous limits for development
    pub fn relaxed() -> Self {
        Self {
            memory_limit_mb: 256,
            max_stack_size_kb: 1024,
        }
    }

    /// Heap limit in bytes
    pub fn memory_limit_bytes(&self) -> usize {
        (self.memory_limit_mb * 1024 * 1024) as usize
    }

    /// Stack limit in bytes
    pub fn max_stack_size_bytes(&self) -> usize {
        (self.max_stack_size_kb * 1024) as usize
    }

    /// Validate engine limits
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_limit_mb < 4 {
            return Err("Memory limit cannot be less than 4MB".to_string());
        }
        if self.memory_limit_mb > 4096 {
            return Err("Memory limit cannot exceed 4GB".to_string());
        }

        // Blocking worker threads run with a 2MB stack
        if self.max_stack_size_kb < 64 {
            return Err("Stack size cannot be less than 64KB".to_string());
        }
        if self.max_stack_size_kb > 1536 {
            return Err("Stack size cannot exceed 1536KB".to_string());
        }

        Ok(())
    }
}

// src/functions/mod.rs
//! Tenant functions
//!
//! - **Registry**: named scripts, optionally loaded from a directory
//! - **Service**: invocation styles (HTTP get/post, template render,
//!   internal run/trigger) on top of the gate and coordinator

pub mod registry;
pub mod service;

pub use registry::{FunctionRegistry, TenantFunction};
pub use service::{FunctionService, ServiceConfig};

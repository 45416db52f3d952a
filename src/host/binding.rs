// src/host/binding.rs
//! Binding host adapters into an engine
//!
//! A single native function, `hostCall(target, method, argsJson)`, is handed
//! to the prelude's `__installHost`, which builds `api`, `http` and `email`
//! on top of it. Replies are JSON envelopes:
//!
//! - `{"ok": value}` for primitives
//! - `{"ok": value, "ref": n}` for objects and arrays; the host keeps its own
//!   copy at index `n` so the marshaler can hand back the host-native value
//! - `{"error": message}`, which the prelude rethrows as a JS `Error`

use crate::host::{
    ApiArea, EmailMessage, HostBindingSet, HostError, HttpMethod, OutboundRequest,
};
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use rquickjs::{CatchResultExt, Ctx, Function, Value};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Host-side copies of object values returned to the script
#[derive(Debug, Default)]
pub struct HostValueTable {
    values: Mutex<Vec<JsonValue>>,
}

impl HostValueTable {
    /// Keep `value` and return its reference index
    pub fn retain(&self, value: JsonValue) -> usize {
        let mut values = self.values.lock();
        values.push(value);
        values.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<JsonValue> {
        self.values.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dispatches script calls to the bound adapters
pub(crate) struct HostBridge {
    bindings: HostBindingSet,
    handle: Handle,
    values: Arc<HostValueTable>,
}

impl HostBridge {
    pub(crate) fn new(bindings: HostBindingSet, handle: Handle, values: Arc<HostValueTable>) -> Self {
        Self {
            bindings,
            handle,
            values,
        }
    }

    /// Handle one `hostCall` and encode the reply envelope
    pub(crate) fn reply(&self, target: &str, method: &str, args_json: &str) -> String {
        let outcome = serde_json::from_str::<Vec<JsonValue>>(args_json)
            .map_err(|e| HostError::InvalidArguments(e.to_string()))
            .and_then(|args| self.dispatch(target, method, args));

        let envelope = match outcome {
            Ok(value @ (JsonValue::Object(_) | JsonValue::Array(_))) => {
                let index = self.values.retain(value.clone());
                json!({ "ok": value, "ref": index })
            }
            Ok(value) => json!({ "ok": value }),
            Err(e) => {
                debug!(target, method, error = %e, "Host call failed");
                json!({ "error": e.to_string() })
            }
        };

        envelope.to_string()
    }

    /// Run the host operation to completion on the calling worker thread
    pub(crate) fn dispatch(
        &self,
        target: &str,
        method: &str,
        args: Vec<JsonValue>,
    ) -> std::result::Result<JsonValue, HostError> {
        match target {
            "api" => {
                let (area, operation) = method
                    .split_once('.')
                    .ok_or_else(|| HostError::InvalidArguments(format!("malformed api call: {}", method)))?;
                let area: ApiArea = area.parse()?;
                self.block_on(self.bindings.api.call(area, operation, args))
            }
            "http" => {
                let method: HttpMethod = method.parse()?;
                let request = OutboundRequest::from_script_args(method, args)?;
                let response = self.block_on(self.bindings.http.send(request))?;
                to_json(&response)
            }
            "email" => {
                if method != "send" {
                    return Err(HostError::UnknownTarget(format!("email.{}", method)));
                }
                let message = args
                    .into_iter()
                    .next()
                    .ok_or_else(|| HostError::InvalidArguments("email.send requires a message".to_string()))?;
                let message: EmailMessage = serde_json::from_value(message)
                    .map_err(|e| HostError::InvalidArguments(format!("invalid email message: {}", e)))?;
                self.block_on(self.bindings.emailer.send(message))?;
                Ok(JsonValue::Null)
            }
            other => Err(HostError::UnknownTarget(other.to_string())),
        }
    }
}

impl HostBridge {
    /// Drive an adapter future on the runtime behind `handle`
    ///
    /// A runtime that is shutting down panics inside timers and I/O; that
    /// surfaces to the script as an unavailable host service.
    fn block_on<T>(
        &self,
        operation: impl Future<Output = std::result::Result<T, HostError>>,
    ) -> std::result::Result<T, HostError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.handle.block_on(operation))).unwrap_or_else(|_| {
            warn!("Host call abandoned: runtime is shutting down");
            Err(HostError::Unavailable("host runtime is shutting down".to_string()))
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> std::result::Result<JsonValue, HostError> {
    serde_json::to_value(value).map_err(|e| HostError::Operation(e.to_string()))
}

/// Install the host surface and identity globals into `ctx`
///
/// Must run on a thread where `handle.block_on` is allowed (a blocking
/// worker, never an async task).
pub(crate) fn bind_host_objects<'js>(
    ctx: &Ctx<'js>,
    bindings: HostBindingSet,
    handle: Handle,
) -> Result<Arc<HostValueTable>> {
    let values = Arc::new(HostValueTable::default());

    let user = bindings.user.as_ref().map(serde_json::to_string).transpose()?;
    let organization = bindings
        .organization
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let bridge = HostBridge::new(bindings, handle, Arc::clone(&values));

    let host_call = Function::new(
        ctx.clone(),
        move |target: String, method: String, args: String| -> String {
            bridge.reply(&target, &method, &args)
        },
    )
    .map_err(|e| binding_fault("hostCall", e))?;

    let globals = ctx.globals();
    let install: Function = globals
        .get("__installHost")
        .map_err(|e| binding_fault("__installHost", e))?;
    install
        .call::<_, ()>((host_call,))
        .catch(ctx)
        .map_err(|e| EngineError::ScriptFault(format!("host binding failed: {}", e)))?;

    set_identity_global(ctx, "currentUser", user)?;
    set_identity_global(ctx, "currentOrganization", organization)?;

    Ok(values)
}

fn set_identity_global<'js>(ctx: &Ctx<'js>, name: &str, json: Option<String>) -> Result<()> {
    let value = match json {
        Some(json) => ctx
            .json_parse(json)
            .catch(ctx)
            .map_err(|e| EngineError::ScriptFault(format!("{} binding failed: {}", name, e)))?,
        None => Value::new_null(ctx.clone()),
    };

    ctx.globals()
        .set(name, value)
        .map_err(|e| binding_fault(name, e))
}

fn binding_fault(what: &str, error: rquickjs::Error) -> EngineError {
    warn!(binding = what, error = %error, "Host binding failed");
    EngineError::ScriptFault(format!("host binding {} failed: {}", what, error))
}

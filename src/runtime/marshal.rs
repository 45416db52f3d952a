// src/runtime/marshal.rs
//! Converting engine values into `ExecutionResult`
//!
//! Runs inside the engine context, before the engine is released. Nothing
//! produced here borrows from the engine.

use crate::host::binding::HostValueTable;
use crate::observability::metric_names;
use crate::runtime::result::{ExecutionResult, ResultKind, StructuredResult};
use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Object, Value};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

const HOST_REF_KEY: &str = "__hostRef";

/// Marshal the settled return value of an entrypoint
pub(crate) fn marshal_result<'js>(
    ctx: &Ctx<'js>,
    value: Value<'js>,
    host_values: &HostValueTable,
) -> ExecutionResult {
    if value.is_undefined() || value.is_null() {
        return ExecutionResult::Empty;
    }

    if let Some(object) = value.as_object() {
        if let Ok(Some(tag)) = object.get::<_, Option<String>>("contentType") {
            match ResultKind::from_content_type(&tag) {
                Some(kind) => {
                    return ExecutionResult::Structured(marshal_structured(
                        ctx,
                        kind,
                        object,
                        host_values,
                    ))
                }
                None => debug!(content_type = %tag, "Unrecognized contentType; marshaling as raw value"),
            }
        }
    }

    ExecutionResult::Value(marshal_value(ctx, value, host_values))
}

fn marshal_structured<'js>(
    ctx: &Ctx<'js>,
    kind: ResultKind,
    object: &Object<'js>,
    host_values: &HostValueTable,
) -> StructuredResult {
    let body = match object.get::<_, Value>("body") {
        Ok(body) => marshal_value(ctx, body, host_values),
        Err(_) => JsonValue::Null,
    };

    let status = object
        .get::<_, Value>("statusCode")
        .ok()
        .and_then(|v| coerce_status(&v))
        .unwrap_or_else(|| kind.default_status());

    StructuredResult::new(kind, body).with_status(status)
}

/// Integer or float status within 100..=599
fn coerce_status(value: &Value<'_>) -> Option<u16> {
    let code = if let Some(int) = value.as_int() {
        i64::from(int)
    } else if let Some(float) = value.as_float() {
        if !float.is_finite() {
            return None;
        }
        float.round() as i64
    } else {
        return None;
    };

    if (100..=599).contains(&code) {
        u16::try_from(code).ok()
    } else {
        None
    }
}

fn marshal_value<'js>(ctx: &Ctx<'js>, value: Value<'js>, host_values: &HostValueTable) -> JsonValue {
    if value.is_undefined() || value.is_null() {
        return JsonValue::Null;
    }
    if let Some(flag) = value.as_bool() {
        return JsonValue::Bool(flag);
    }
    if let Some(int) = value.as_int() {
        return JsonValue::from(int);
    }
    if let Some(float) = value.as_float() {
        if float.is_finite() && float.fract() == 0.0 && float.abs() < 9.007_199_254_740_992e15 {
            return JsonValue::from(float as i64);
        }
        if let Some(number) = serde_json::Number::from_f64(float) {
            return JsonValue::Number(number);
        }
        return fallback(value);
    }
    if let Some(text) = value.as_string() {
        return match text.to_string() {
            Ok(text) => JsonValue::String(text),
            Err(_) => fallback(value),
        };
    }

    if let Some(host_value) = host_native(&value, host_values) {
        return host_value;
    }

    json_round_trip(ctx, value.clone()).unwrap_or_else(|| fallback(value))
}

/// Value previously returned by a host adapter, as the host retained it
fn host_native(value: &Value<'_>, host_values: &HostValueTable) -> Option<JsonValue> {
    let index = value
        .as_object()?
        .get::<_, Option<u32>>(HOST_REF_KEY)
        .ok()
        .flatten()?;
    host_values.get(index as usize)
}

fn json_round_trip<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Option<JsonValue> {
    match ctx.json_stringify(value) {
        Ok(Some(json)) => {
            let json = json.to_string().ok()?;
            serde_json::from_str(&json).ok()
        }
        Ok(None) => None,
        Err(_) => {
            // Clear the pending exception (cycles, BigInt, throwing toJSON)
            let _ = ctx.catch();
            None
        }
    }
}

/// String rendering used when a value cannot be serialized
fn fallback(value: Value<'_>) -> JsonValue {
    let value_type = value.type_of();
    let rendered = value
        .get::<Coerced<String>>()
        .map(|coerced| coerced.0)
        .unwrap_or_else(|_| format!("[{:?}]", value_type));

    warn!(value_type = ?value_type, "Result could not be serialized; falling back to string rendering");
    metrics::counter!(metric_names::MARSHALING_FALLBACKS_TOTAL).increment(1);

    JsonValue::String(rendered)
}

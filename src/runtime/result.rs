// src/runtime/result.rs
//! Engine-independent execution results
//!
//! Scripts may return one of five structured shapes keyed by `contentType`:
//!
//! | contentType          | Kind         | Default status |
//! |----------------------|--------------|----------------|
//! | `application/json`   | `Json`       | 200            |
//! | `text/html`          | `Html`       | 200            |
//! | `application/xml`    | `Xml`        | 200            |
//! | `redirectToUrl`      | `Redirect`   | 302            |
//! | `statusCode`         | `StatusCode` | 200            |
//!
//! Anything else is carried as a raw JSON value.

use serde::Serialize;
use serde_json::Value as JsonValue;

/// The five recognized structured result shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Json,
    Html,
    Xml,
    Redirect,
    StatusCode,
}

impl ResultKind {
    /// Match a script-provided `contentType` tag
    pub fn from_content_type(tag: &str) -> Option<Self> {
        match tag {
            "application/json" => Some(Self::Json),
            "text/html" => Some(Self::Html),
            "application/xml" => Some(Self::Xml),
            "redirectToUrl" => Some(Self::Redirect),
            "statusCode" => Some(Self::StatusCode),
            _ => None,
        }
    }

    /// The wire `contentType` tag
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Html => "text/html",
            Self::Xml => "application/xml",
            Self::Redirect => "redirectToUrl",
            Self::StatusCode => "statusCode",
        }
    }

    /// Status used when the script omits one or provides an invalid one
    pub fn default_status(&self) -> u16 {
        match self {
            Self::Redirect => 302,
            _ => 200,
        }
    }
}

/// A structured result with explicit content type and status
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResult {
    pub kind: ResultKind,

    /// Strings are kept verbatim; objects are host-native JSON trees
    pub body: JsonValue,

    pub status_code: u16,
}

impl StructuredResult {
    pub fn new(kind: ResultKind, body: JsonValue) -> Self {
        Self {
            kind,
            body,
            status_code: kind.default_status(),
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn content_type(&self) -> &'static str {
        self.kind.content_type()
    }

    /// Body as response text: strings verbatim, trees as JSON, null as empty
    pub fn body_text(&self) -> String {
        match &self.body {
            JsonValue::Null => String::new(),
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    /// Target URL of a redirect result
    pub fn redirect_location(&self) -> Option<&str> {
        match (self.kind, &self.body) {
            (ResultKind::Redirect, JsonValue::String(url)) => Some(url),
            _ => None,
        }
    }
}

/// Outcome of a successful execution, detached from the engine
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExecutionResult {
    /// The entrypoint returned `undefined` or `null`
    #[default]
    Empty,

    Structured(StructuredResult),

    /// Primitive or serialized tree without a recognized `contentType`
    Value(JsonValue),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireResult<'a> {
    content_type: &'a str,
    body: &'a JsonValue,
    status_code: u16,
}

impl ExecutionResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, ExecutionResult::Empty)
    }

    pub fn content_type(&self) -> Option<&'static str> {
        self.as_structured().map(StructuredResult::content_type)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.as_structured().map(|s| s.status_code)
    }

    pub fn as_structured(&self) -> Option<&StructuredResult> {
        match self {
            ExecutionResult::Structured(structured) => Some(structured),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&JsonValue> {
        match self {
            ExecutionResult::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Wire shape: `{contentType, body, statusCode}` for structured results,
    /// the value itself otherwise
    pub fn to_wire(&self) -> JsonValue {
        match self {
            ExecutionResult::Empty => JsonValue::Null,
            ExecutionResult::Structured(s) => serde_json::to_value(WireResult {
                content_type: s.content_type(),
                body: &s.body,
                status_code: s.status_code,
            })
            .unwrap_or(JsonValue::Null),
            ExecutionResult::Value(value) => value.clone(),
        }
    }

    /// Text form used when a function is rendered into a template
    pub fn render_text(&self) -> String {
        match self {
            ExecutionResult::Empty => String::new(),
            ExecutionResult::Structured(s) => s.body_text(),
            ExecutionResult::Value(JsonValue::String(text)) => text.clone(),
            ExecutionResult::Value(JsonValue::Null) => String::new(),
            ExecutionResult::Value(other) => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_type_mapping() {
        for kind in [
            ResultKind::Json,
            ResultKind::Html,
            ResultKind::Xml,
            ResultKind::Redirect,
            ResultKind::StatusCode,
        ] {
            assert_eq!(ResultKind::from_content_type(kind.content_type()), Some(kind));
        }
        assert_eq!(ResultKind::from_content_type("text/plain"), None);
    }

    #[test]
    fn test_default_status() {
        assert_eq!(StructuredResult::new(ResultKind::Redirect, json!("/home")).status_code, 302);
        assert_eq!(StructuredResult::new(ResultKind::Html, json!("<p/>")).status_code, 200);
    }

    #[test]
    fn test_wire_shape() {
        let result = ExecutionResult::Structured(
            StructuredResult::new(ResultKind::Json, json!({"a": 1})).with_status(201),
        );
        assert_eq!(
            result.to_wire(),
            json!({"contentType": "application/json", "body": {"a": 1}, "statusCode": 201})
        );
    }

    #[test]
    fn test_render_text() {
        assert_eq!(ExecutionResult::Empty.render_text(), "");
        assert_eq!(ExecutionResult::Value(json!("hello")).render_text(), "hello");
        assert_eq!(ExecutionResult::Value(json!([1, 2])).render_text(), "[1,2]");

        let html = ExecutionResult::Structured(StructuredResult::new(
            ResultKind::Html,
            json!("<b>hi</b>"),
        ));
        assert_eq!(html.render_text(), "<b>hi</b>");
    }

    #[test]
    fn test_redirect_location() {
        let redirect = StructuredResult::new(ResultKind::Redirect, json!("https://example.com"));
        assert_eq!(redirect.redirect_location(), Some("https://example.com"));

        let json = StructuredResult::new(ResultKind::Json, json!("https://example.com"));
        assert_eq!(json.redirect_location(), None);
    }
}

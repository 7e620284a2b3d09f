//! JSON-RPC envelope exchanged with the child process.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Fixed protocol version string carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_owned()
}

/// Deserialize a present field as `Some`, keeping an explicit `null` as
/// `Some(Value::Null)` instead of collapsing it to `None`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// One JSON-RPC message: request, notification, or response.
///
/// Only the envelope shape is modelled. `params`, `result` and `error` are
/// carried as opaque [`Value`]s and never interpreted by the session core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version; always `"2.0"` on outbound messages.
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Correlation id; absent on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Method name on requests and notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
    /// Successful response payload.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Error response payload.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Value>,
}

impl Envelope {
    /// Build a request carrying `id`, `method` and `params`.
    #[must_use]
    pub fn request(id: i64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: Some(id),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Build a notification (a request without an id).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: None,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Build a successful response.
    #[must_use]
    pub fn response(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn error_response(id: i64, error: Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// `true` when the envelope has both a method and an id.
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    /// `true` when the envelope has a method but no id.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    /// `true` when the envelope carries exactly one of `result` / `error`
    /// and no method.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.method.is_none() && (self.result.is_some() != self.error.is_some())
    }

    /// `true` for a response carrying an `error` payload.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.is_response() && self.error.is_some()
    }
}

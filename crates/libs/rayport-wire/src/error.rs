use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::frame::WireError;
use crate::id::RequestId;

/// JSON-RPC error codes emitted by the service.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const TASK_CANCELLED: i64 = 1;
    pub const TASK_NOT_FOUND: i64 = 2;
    pub const UPLOAD_MISSING: i64 = 3;
}

/// One schema violation: where in the params it happened and why.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

/// Errors scoped to a single request/response exchange. None of them tear
/// down the connection.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum RpcError {
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("method not found: {method}")]
    MethodNotFound { method: String },

    #[error("invalid params: {}", summarize(.violations))]
    InvalidParams { violations: Vec<Violation> },

    /// Domain error raised by handler code, forwarded with its own code.
    #[error("{message} (code {code})")]
    Handler { code: i64, message: String, data: Option<JsonValue> },

    /// Unexpected failure. The message is for the server log only.
    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("task cancelled")]
    TaskCancelled,

    #[error("no task with id {id}")]
    TaskNotFound { id: RequestId },

    #[error("method '{method}' expects binary data but none was uploaded")]
    UploadMissing { method: String },
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|violation| format!("{}: {}", display_path(&violation.path), violation.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

impl RpcError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn handler(code: i64, message: impl Into<String>) -> Self {
        Self::Handler { code, message: message.into(), data: None }
    }

    /// Attaches `data` to a handler error; other variants are returned as is.
    pub fn with_data(self, data: JsonValue) -> Self {
        match self {
            Self::Handler { code, message, .. } => {
                Self::Handler { code, message, data: Some(data) }
            }
            other => other,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Parse { .. } => codes::PARSE_ERROR,
            Self::InvalidRequest { .. } => codes::INVALID_REQUEST,
            Self::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => codes::INVALID_PARAMS,
            Self::Handler { code, .. } => *code,
            Self::Internal { .. } => codes::INTERNAL_ERROR,
            Self::TaskCancelled => codes::TASK_CANCELLED,
            Self::TaskNotFound { .. } => codes::TASK_NOT_FOUND,
            Self::UploadMissing { .. } => codes::UPLOAD_MISSING,
        }
    }

    /// The message shown to the client. Internal details are withheld.
    pub fn client_message(&self) -> String {
        match self {
            Self::Parse { message } => format!("Parse error: {message}"),
            Self::InvalidRequest { message } => format!("Invalid request: {message}"),
            Self::MethodNotFound { method } => format!("Method not found: {method}"),
            Self::InvalidParams { .. } => "Invalid params".to_string(),
            Self::Handler { message, .. } => message.clone(),
            Self::Internal { .. } => "Internal error".to_string(),
            Self::TaskCancelled => "Task cancelled".to_string(),
            Self::TaskNotFound { id } => format!("No task with id {id}"),
            Self::UploadMissing { method } => {
                format!("Method '{method}' expects binary data but none was uploaded")
            }
        }
    }

    pub fn data(&self) -> Option<JsonValue> {
        match self {
            Self::InvalidParams { violations } => Some(json!(violations)),
            Self::Handler { data, .. } => data.clone(),
            _ => None,
        }
    }

    pub fn to_object(&self) -> ErrorObject {
        ErrorObject { code: self.code(), message: self.client_message(), data: self.data() }
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::InvalidParams { violations } => violations,
            _ => &[],
        }
    }
}

impl From<WireError> for RpcError {
    fn from(err: WireError) -> Self {
        Self::parse(err.to_string())
    }
}

/// The `error` member of a JSON-RPC response as it appears on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ErrorObject {
    pub fn to_json(&self) -> JsonValue {
        let mut object = JsonMap::new();
        object.insert("code".to_string(), JsonValue::from(self.code));
        object.insert("message".to_string(), JsonValue::String(self.message.clone()));
        if let Some(data) = &self.data {
            object.insert("data".to_string(), data.clone());
        }
        JsonValue::Object(object)
    }

    /// Violations carried by an `InvalidParams` error, if any.
    pub fn violations(&self) -> Vec<Violation> {
        self.data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::{codes, RpcError, Violation};
    use crate::id::RequestId;
    use serde_json::json;

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = RpcError::internal("mutex poisoned in scene graph");
        let object = err.to_object();
        assert_eq!(object.code, codes::INTERNAL_ERROR);
        assert_eq!(object.message, "Internal error");
        assert!(object.data.is_none());
        assert!(err.to_string().contains("mutex poisoned"));
    }

    #[test]
    fn invalid_params_carry_every_violation() {
        let err = RpcError::InvalidParams {
            violations: vec![
                Violation::new("/width", "-1 is less than the minimum of 1"),
                Violation::new("", "\"height\" is a required property"),
            ],
        };
        let object = err.to_object();
        assert_eq!(object.code, codes::INVALID_PARAMS);
        assert_eq!(object.violations().len(), 2);
        assert_eq!(object.violations()[0].path, "/width");
        assert!(err.to_string().contains("<root>"));
    }

    #[test]
    fn handler_errors_pass_code_message_and_data_through() {
        let err = RpcError::handler(42, "model is locked").with_data(json!({"model": 3}));
        assert_eq!(
            err.to_object().to_json(),
            json!({"code": 42, "message": "model is locked", "data": {"model": 3}})
        );
    }

    #[test]
    fn task_errors_use_application_codes() {
        assert_eq!(RpcError::TaskCancelled.code(), codes::TASK_CANCELLED);
        let err = RpcError::TaskNotFound { id: RequestId::from("render-1") };
        assert_eq!(err.code(), codes::TASK_NOT_FOUND);
        assert_eq!(err.client_message(), "No task with id \"render-1\"");
    }
}

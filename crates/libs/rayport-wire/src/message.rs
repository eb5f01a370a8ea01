use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::envelope::{Request, JSONRPC_VERSION};
use crate::error::RpcError;
use crate::frame::Frame;
use crate::id::RequestId;
use crate::payload::Payload;

/// Method name of task progress notifications.
pub const PROGRESS_METHOD: &str = "progress";

/// An outbound message, ready to be turned into a [`Frame`].
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Request(Request),
    Result { id: RequestId, payload: Payload },
    Error { id: RequestId, error: RpcError },
    Progress { id: RequestId, message: String, amount: f64 },
}

impl Message {
    pub fn result(id: RequestId, payload: Payload) -> Self {
        Self::Result { id, payload }
    }

    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self::Error { id, error }
    }

    /// Progress for a running task; `amount` is clamped to `[0, 1]` and a
    /// non-finite value becomes 0.
    pub fn progress(id: RequestId, message: impl Into<String>, amount: f64) -> Self {
        let amount = if amount.is_finite() { amount.clamp(0.0, 1.0) } else { 0.0 };
        Self::Progress { id, message: message.into(), amount }
    }

    pub fn id(&self) -> &RequestId {
        match self {
            Self::Request(request) => &request.id,
            Self::Result { id, .. } | Self::Error { id, .. } | Self::Progress { id, .. } => id,
        }
    }

    pub fn into_frame(self) -> Frame {
        let mut envelope = JsonMap::new();
        envelope.insert("jsonrpc".to_string(), JsonValue::from(JSONRPC_VERSION));
        let binary = match self {
            Self::Request(request) => {
                if !request.id.is_empty() {
                    envelope.insert("id".to_string(), request.id.to_json());
                }
                envelope.insert("method".to_string(), JsonValue::String(request.method));
                let (params, binary) = request.payload.into_parts();
                if !params.is_null() {
                    envelope.insert("params".to_string(), params);
                }
                binary
            }
            Self::Result { id, payload } => {
                let (result, binary) = payload.into_parts();
                envelope.insert("id".to_string(), id.to_json());
                envelope.insert("result".to_string(), result);
                binary
            }
            Self::Error { id, error } => {
                envelope.insert("id".to_string(), id.to_json());
                envelope.insert("error".to_string(), error.to_object().to_json());
                Vec::new()
            }
            Self::Progress { id, message, amount } => {
                let mut params = JsonMap::new();
                params.insert("id".to_string(), id.to_json());
                params.insert("message".to_string(), JsonValue::String(message));
                params.insert("amount".to_string(), JsonValue::from(amount));
                envelope.insert("method".to_string(), JsonValue::from(PROGRESS_METHOD));
                envelope.insert("params".to_string(), JsonValue::Object(params));
                Vec::new()
            }
        };
        Frame::new(JsonValue::Object(envelope), binary)
    }
}

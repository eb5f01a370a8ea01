use serde_json::Value as JsonValue;

use crate::envelope::JSONRPC_VERSION;
use crate::error::{ErrorObject, RpcError};
use crate::frame::Frame;
use crate::id::RequestId;
use crate::message::PROGRESS_METHOD;
use crate::payload::Payload;

/// A server message as seen by a client.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Result { id: RequestId, payload: Payload },
    Error { id: RequestId, error: ErrorObject },
    Progress { id: RequestId, message: String, amount: f64 },
}

impl Reply {
    pub fn parse(frame: Frame) -> Result<Self, RpcError> {
        let (json, binary) = frame.into_parts();
        let JsonValue::Object(mut envelope) = json else {
            return Err(RpcError::invalid_request("reply must be a JSON object"));
        };
        if envelope.get("jsonrpc").and_then(JsonValue::as_str) != Some(JSONRPC_VERSION) {
            return Err(RpcError::invalid_request("reply is not a jsonrpc 2.0 message"));
        }

        if let Some(method) = envelope.get("method").and_then(JsonValue::as_str) {
            if method != PROGRESS_METHOD {
                return Err(RpcError::invalid_request(format!(
                    "unexpected server notification '{method}'"
                )));
            }
            let params = envelope.remove("params").unwrap_or(JsonValue::Null);
            let id = RequestId::from_json(params.get("id").unwrap_or(&JsonValue::Null))?;
            let message = params.get("message").and_then(JsonValue::as_str).unwrap_or_default();
            let amount = params.get("amount").and_then(JsonValue::as_f64).unwrap_or_default();
            return Ok(Self::Progress { id, message: message.to_string(), amount });
        }

        let id = RequestId::from_json(envelope.get("id").unwrap_or(&JsonValue::Null))?;
        if let Some(result) = envelope.remove("result") {
            return Ok(Self::Result { id, payload: Payload::with_binary(result, binary) });
        }
        if let Some(error) = envelope.remove("error") {
            let error: ErrorObject = serde_json::from_value(error)
                .map_err(|err| RpcError::invalid_request(format!("malformed error: {err}")))?;
            return Ok(Self::Error { id, error });
        }
        Err(RpcError::invalid_request("reply carries neither result nor error"))
    }

    pub fn id(&self) -> &RequestId {
        match self {
            Self::Result { id, .. } | Self::Error { id, .. } | Self::Progress { id, .. } => id,
        }
    }

    /// True for the single message that ends a request: a result or an error.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

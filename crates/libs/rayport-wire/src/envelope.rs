use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::RpcError;
use crate::frame::Frame;
use crate::id::RequestId;
use crate::payload::Payload;

pub const JSONRPC_VERSION: &str = "2.0";

/// An inbound JSON-RPC request with its params and attached binary data.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub payload: Payload,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: JsonValue) -> Self {
        Self { id: id.into(), method: method.into(), payload: Payload::new(params) }
    }

    pub fn notification(method: impl Into<String>, params: JsonValue) -> Self {
        Self { id: RequestId::Empty, method: method.into(), payload: Payload::new(params) }
    }

    pub fn with_binary(mut self, binary: Vec<u8>) -> Self {
        self.payload.binary = binary;
        self
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_empty()
    }

    pub fn from_frame(frame: Frame) -> Result<Self, RpcError> {
        let (json, binary) = frame.into_parts();
        parse_request(json, binary)
    }
}

/// Interprets a decoded JSON document as a request envelope.
///
/// An absent or `null` id yields a notification. `params` is moved out of the
/// envelope; when absent it becomes `null`.
pub fn parse_request(json: JsonValue, binary: Vec<u8>) -> Result<Request, RpcError> {
    let JsonValue::Object(mut envelope) = json else {
        return Err(RpcError::invalid_request("envelope must be a JSON object"));
    };
    check_version(&envelope)?;
    let method = match envelope.remove("method") {
        Some(JsonValue::String(method)) => method,
        Some(_) => return Err(RpcError::invalid_request("method must be a string")),
        None => return Err(RpcError::invalid_request("missing method")),
    };
    let id = match envelope.get("id") {
        Some(value) => RequestId::from_json(value)?,
        None => RequestId::Empty,
    };
    let params = envelope.remove("params").unwrap_or(JsonValue::Null);
    Ok(Request { id, method, payload: Payload::with_binary(params, binary) })
}

fn check_version(envelope: &JsonMap<String, JsonValue>) -> Result<(), RpcError> {
    match envelope.get("jsonrpc") {
        Some(JsonValue::String(version)) if version == JSONRPC_VERSION => Ok(()),
        Some(other) => Err(RpcError::invalid_request(format!(
            "unsupported jsonrpc version {other}, expected \"{JSONRPC_VERSION}\""
        ))),
        None => Err(RpcError::invalid_request("missing jsonrpc version")),
    }
}

/// Best-effort id recovery from an envelope that failed to parse, so the
/// error can still be correlated. Returns `None` for notifications and for
/// ids that are themselves invalid.
pub fn recover_id(json: &JsonValue) -> Option<RequestId> {
    let id = RequestId::from_json(json.get("id")?).ok()?;
    (!id.is_empty()).then_some(id)
}

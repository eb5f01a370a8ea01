use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::error::RpcError;

/// Identifier of a JSON-RPC request.
///
/// `Empty` covers both an absent and a `null` id: the request is a
/// notification and never receives a response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestId {
    #[default]
    Empty,
    Integer(i64),
    String(String),
}

impl RequestId {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Interprets an envelope `id` member. Only `null`, integers that fit in
    /// an `i64` and strings are accepted.
    pub fn from_json(value: &JsonValue) -> Result<Self, RpcError> {
        match value {
            JsonValue::Null => Ok(Self::Empty),
            JsonValue::String(text) => Ok(Self::String(text.clone())),
            JsonValue::Number(number) => number.as_i64().map(Self::Integer).ok_or_else(|| {
                RpcError::invalid_request(format!("request id {number} is not a 64-bit integer"))
            }),
            other => Err(RpcError::invalid_request(format!(
                "request id must be null, an integer or a string, got {}",
                json_kind(other)
            ))),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Empty => JsonValue::Null,
            Self::Integer(value) => JsonValue::from(*value),
            Self::String(value) => JsonValue::String(value.clone()),
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("null"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_unit(),
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::String(value) => serializer.serialize_str(value),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Self::from_json(&value).map_err(D::Error::custom)
    }
}

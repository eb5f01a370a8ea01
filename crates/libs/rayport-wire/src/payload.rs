use serde_json::Value as JsonValue;

/// JSON value plus an optional binary tail.
///
/// Used both for request params and for handler results. Stages hand a
/// payload over by value so a large tail is never copied between them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Payload {
    pub json: JsonValue,
    pub binary: Vec<u8>,
}

impl Payload {
    pub fn new(json: JsonValue) -> Self {
        Self { json, binary: Vec::new() }
    }

    pub fn with_binary(json: JsonValue, binary: Vec<u8>) -> Self {
        Self { json, binary }
    }

    pub fn has_binary(&self) -> bool {
        !self.binary.is_empty()
    }

    pub fn into_parts(self) -> (JsonValue, Vec<u8>) {
        (self.json, self.binary)
    }
}

impl From<JsonValue> for Payload {
    fn from(json: JsonValue) -> Self {
        Self::new(json)
    }
}

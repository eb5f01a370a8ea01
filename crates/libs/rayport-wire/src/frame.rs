use serde_json::Value as JsonValue;

use crate::payload::Payload;

/// Width of the little-endian JSON header length that starts a binary frame.
pub const HEADER_SIZE_LEN: usize = 4;

/// A frame as delivered by (or handed to) the transport. The variant mirrors
/// the transport's own text/binary message flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl RawFrame {
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded frame: a JSON document, optionally followed by a binary tail.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Text(JsonValue),
    Binary { json: JsonValue, binary: Vec<u8> },
}

impl Frame {
    /// Builds a frame, choosing the text form when there is no binary tail.
    pub fn new(json: JsonValue, binary: Vec<u8>) -> Self {
        if binary.is_empty() {
            Self::Text(json)
        } else {
            Self::Binary { json, binary }
        }
    }

    pub fn json(&self) -> &JsonValue {
        match self {
            Self::Text(json) | Self::Binary { json, .. } => json,
        }
    }

    pub fn binary(&self) -> &[u8] {
        match self {
            Self::Text(_) => &[],
            Self::Binary { binary, .. } => binary,
        }
    }

    pub fn into_parts(self) -> (JsonValue, Vec<u8>) {
        match self {
            Self::Text(json) => (json, Vec::new()),
            Self::Binary { json, binary } => (json, binary),
        }
    }
}

impl From<Payload> for Frame {
    fn from(payload: Payload) -> Self {
        Self::new(payload.json, payload.binary)
    }
}

impl From<Frame> for Payload {
    fn from(frame: Frame) -> Self {
        let (json, binary) = frame.into_parts();
        Payload::with_binary(json, binary)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("binary frame of {len} bytes is shorter than its 4 byte size field")]
    Truncated { len: usize },

    #[error("binary frame declares a {declared} byte header but only {available} bytes follow")]
    HeaderOverflow { declared: usize, available: usize },

    #[error("JSON header of {len} bytes does not fit the 4 byte size field")]
    HeaderTooLarge { len: usize },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn decode(raw: RawFrame) -> Result<Frame, WireError> {
    match raw {
        RawFrame::Text(text) => decode_text(&text),
        RawFrame::Binary(bytes) => decode_binary(bytes),
    }
}

pub fn decode_text(text: &str) -> Result<Frame, WireError> {
    Ok(Frame::Text(serde_json::from_str(text)?))
}

/// Splits `[u32 LE header size][JSON header][binary tail]`. The tail is
/// everything after the header; the transport guarantees one logical frame
/// per call.
pub fn decode_binary(mut bytes: Vec<u8>) -> Result<Frame, WireError> {
    if bytes.len() < HEADER_SIZE_LEN {
        return Err(WireError::Truncated { len: bytes.len() });
    }
    let mut size_buf = [0u8; HEADER_SIZE_LEN];
    size_buf.copy_from_slice(&bytes[..HEADER_SIZE_LEN]);
    let declared = u32::from_le_bytes(size_buf) as usize;
    let available = bytes.len() - HEADER_SIZE_LEN;
    if declared > available {
        return Err(WireError::HeaderOverflow { declared, available });
    }
    let header_end = HEADER_SIZE_LEN + declared;
    let json: JsonValue = serde_json::from_slice(&bytes[HEADER_SIZE_LEN..header_end])?;
    // Shift the tail down in place rather than copying it into a new buffer.
    bytes.drain(..header_end);
    Ok(Frame::new(json, bytes))
}

pub fn encode(frame: Frame) -> Result<RawFrame, WireError> {
    let (json, binary) = frame.into_parts();
    if binary.is_empty() {
        return Ok(RawFrame::Text(serde_json::to_string(&json)?));
    }
    let header = serde_json::to_vec(&json)?;
    let size = u32::try_from(header.len())
        .map_err(|_| WireError::HeaderTooLarge { len: header.len() })?;
    let mut framed = Vec::with_capacity(HEADER_SIZE_LEN + header.len() + binary.len());
    framed.extend_from_slice(&size.to_le_bytes());
    framed.extend_from_slice(&header);
    framed.extend_from_slice(&binary);
    Ok(RawFrame::Binary(framed))
}

//! Wire model for the rayport rendering service protocol.
//!
//! Clients talk to the service with JSON-RPC 2.0 envelopes. A message travels
//! either as a plain text frame holding the JSON document, or as a binary
//! frame that prefixes the JSON header with its length and appends an opaque
//! binary tail (images, geometry, volumes).
//!
//! - [`RequestId`] identifies a request or marks it as a notification
//! - [`Payload`] is the JSON value plus optional binary tail handed between stages
//! - [`RawFrame`] / [`Frame`] with [`decode`] and [`encode`] implement the framing
//! - [`Request`] is a parsed inbound envelope
//! - [`Message`] builds outbound results, errors, progress and requests
//! - [`Reply`] classifies server messages on the client side
//! - [`RpcError`] is the request-level error taxonomy with its JSON-RPC codes

pub mod envelope;
pub mod error;
pub mod frame;
pub mod id;
pub mod message;
pub mod payload;
pub mod reply;

pub use envelope::{parse_request, recover_id, Request, JSONRPC_VERSION};
pub use error::{codes, ErrorObject, RpcError, Violation};
pub use frame::{decode, encode, Frame, RawFrame, WireError, HEADER_SIZE_LEN};
pub use id::RequestId;
pub use message::{Message, PROGRESS_METHOD};
pub use payload::Payload;
pub use reply::Reply;

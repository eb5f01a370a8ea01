//! Request handling core of the rayport service.
//!
//! An [`EntrypointRegistry`] holds the named methods, each with a JSON Schema
//! for its params and result derived from Rust types. The [`Dispatcher`]
//! turns inbound frames into handler calls: it validates params, draws
//! uploaded binary frames for methods that need them, answers synchronous
//! methods immediately and runs asynchronous ones as cancellable tasks on the
//! blocking pool, streaming progress until their single terminal message.
//!
//! Task handlers must be dispatched from within a tokio runtime.

pub mod builtin;
pub mod connection;
pub mod dispatch;
pub mod registry;
pub mod schema;
pub mod task;
pub mod upload;

pub use connection::{ConnectionContext, ConnectionId, FrameSink, SinkClosed};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use registry::{EntrypointBuilder, EntrypointRegistry, Input, MethodDescriptor, Output};
pub use schema::{schema_for, CompiledSchema, MethodSchema};
pub use task::{TaskContext, TaskHandle, TaskRegistry, TaskState};
pub use upload::BinaryUploadBuffer;

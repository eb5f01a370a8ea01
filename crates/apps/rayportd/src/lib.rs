//! rayport daemon: configuration, the rendering engine collaborator, the
//! engine-backed entrypoints and the WebSocket transport.

pub mod config;
pub mod engine;
pub mod entrypoints;
pub mod server;

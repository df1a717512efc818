//! WebSocket Rooms
//!
//! Each WebSocket connection is one agent job. Submodules:
//!
//! - `protocol`: the JSON message format for client-server communication.
//! - `session`: the connection lifecycle, from `join` to close.

pub mod protocol;
pub mod session;

pub use session::ws_handler;

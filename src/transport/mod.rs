//! Transports over the relay facade
//!
//! - `http`: REST API (axum)
//! - `tools` + `stdio`: JSON-RPC tool server for agent hosts

pub mod http;
pub mod stdio;
pub mod tools;

pub use http::{RelayServer, ServerError};
pub use stdio::run_stdio;
pub use tools::{default_session_id, ToolServer, DEFAULT_SESSION_ID};

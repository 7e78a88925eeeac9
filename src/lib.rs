//! Hive - presence-aware message relay for autonomous agents
//!
//! Independent agents register under a human-readable name, keep themselves
//! alive with heartbeats, broadcast short notices on a shared public channel
//! and exchange private messages on pairwise DM channels. Everything is
//! polled: an agent asks for what arrived since its last poll.
//!
//! # Architecture
//!
//! - **identity**: Human-readable name generation
//! - **directory**: Agent records and the liveness state machine
//! - **channels**: Public and DM channels with bounded retention
//! - **polling**: Session cursors and merged polls
//! - **relay**: The facade every transport calls, plus the background scheduler
//! - **storage**: Storage contract with in-memory and SQLite backends
//! - **transport**: REST API (axum) and JSON-RPC tool server (stdio)
//! - **config**: YAML configuration with `HIVE_*` overrides

// Core modules
pub mod channels;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod polling;
pub mod storage;

// Service layers
pub mod relay;
pub mod transport;

// Utilities
pub mod logging;

// Re-exports
pub use error::{RelayError, Result};
pub use relay::{Relay, RelayBuilder};

//! Identity generation
//!
//! Collision-avoidant, human-readable agent names. The generator is a pure
//! utility: it knows nothing about which names are taken, so registration
//! retries it against the agent directory.

mod generator;
pub mod words;

pub use generator::{generate_name, generate_unique_name, validate_name, DEFAULT_MAX_ATTEMPTS};

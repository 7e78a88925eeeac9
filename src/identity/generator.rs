//! Agent name generation and validation
//!
//! Names look like `silver-falcon-a3f2`: an adjective, a noun and a 16-bit
//! random suffix in lowercase hex. Generation is stateless and may repeat
//! itself; uniqueness is the caller's job via [`generate_unique_name`].

use super::words::{is_adjective, is_noun, ADJECTIVES, NOUNS};
use crate::{RelayError, Result};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::future::Future;

/// Attempts made by [`generate_unique_name`] before giving up
pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

/// Generate a name in the format `{adjective}-{noun}-{4 hex digits}`
pub fn generate_name() -> String {
    let mut rng = OsRng;
    // Both lists are non-empty constants.
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quantum");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("falcon");
    let suffix: u16 = rng.gen();
    format!("{}-{}-{:04x}", adjective, noun, suffix)
}

/// Check the three-part structure, the vocabularies and the hex suffix
pub fn validate_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('-').collect();
    let [adjective, noun, suffix] = parts.as_slice() else {
        return false;
    };

    is_adjective(adjective)
        && is_noun(noun)
        && suffix.len() == 4
        && suffix.chars().all(|c| c.is_ascii_hexdigit())
}

/// Generate names until `exists` reports a free one
///
/// `exists` is usually a directory lookup, so it is async and fallible;
/// storage errors abort the loop immediately rather than counting as an
/// attempt.
///
/// # Errors
/// `ExhaustedAttempts` when every candidate in `max_attempts` was taken.
pub async fn generate_unique_name<F, Fut>(mut exists: F, max_attempts: usize) -> Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=max_attempts {
        let candidate = generate_name();
        if !exists(candidate.clone()).await? {
            tracing::debug!(name = %candidate, attempt, "Generated unique agent name");
            return Ok(candidate);
        }
        tracing::trace!(name = %candidate, attempt, "Agent name collision");
    }

    tracing::error!(
        attempts = max_attempts,
        "Failed to generate unique agent name"
    );
    Err(RelayError::ExhaustedAttempts {
        attempts: max_attempts,
    })
}

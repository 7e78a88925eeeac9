//! Session cursors and merged polling over public and DM channels

mod coordinator;
mod session;

pub use coordinator::{Direction, PollRequest, PollResult, PolledMessage, PollingCoordinator};
pub use session::{Session, SessionRegistry};

//! Public and direct-message channels

mod message;
mod store;

pub use message::{ChannelKey, ChannelKind, Message, MessageId, NewMessage, MAX_THREAD_ID_LEN};
pub use store::{ChannelStats, ChannelStore, RetentionPolicy};

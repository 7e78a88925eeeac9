//! Channel store
//!
//! Writes every message into exactly one bounded channel (public, or the
//! canonical DM channel of its two participants) and serves cursor reads
//! over them. Reads always come back oldest-first.

use super::message::{ChannelKey, Message, NewMessage};
use crate::clock::Clock;
use crate::storage::ChannelStorage;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Entries fetched per storage round-trip when scanning a whole channel
const SCAN_PAGE: usize = 200;

/// Per-channel retention caps (entry counts, oldest evicted first)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub public_max: usize,
    pub dm_max: usize,
}

impl RetentionPolicy {
    fn cap_for(&self, key: &ChannelKey) -> usize {
        match key {
            ChannelKey::Public => self.public_max,
            ChannelKey::Direct { .. } => self.dm_max,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            public_max: 1000,
            dm_max: 500,
        }
    }
}

/// Aggregate channel figures for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub public_messages: u64,
    pub dm_channels: usize,
}

/// Bounded public and DM channels over a [`ChannelStorage`]
pub struct ChannelStore {
    storage: Arc<dyn ChannelStorage>,
    clock: Arc<dyn Clock>,
    retention: RetentionPolicy,
}

impl ChannelStore {
    pub fn new(
        storage: Arc<dyn ChannelStorage>,
        clock: Arc<dyn Clock>,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            storage,
            clock,
            retention,
        }
    }

    /// Stamp, append and trim
    ///
    /// The message is stored whole in a single append, so it either exists
    /// with every field set or not at all.
    pub async fn publish(&self, draft: NewMessage) -> Result<Message> {
        let message = draft.into_message(self.clock.now());
        let key = message.channel_key();
        let raw_key = key.to_string();
        let payload = serde_json::to_string(&message)?;

        self.storage.append(&raw_key, &payload).await?;
        let evicted = self
            .storage
            .trim(&raw_key, self.retention.cap_for(&key))
            .await?;

        tracing::debug!(
            message_id = %message.message_id,
            channel = %raw_key,
            evicted,
            "Message published"
        );
        Ok(message)
    }

    /// Public messages, oldest-first
    ///
    /// With `since`, the oldest `limit` messages strictly newer than it;
    /// without, the most recent `limit` messages.
    pub async fn read_public(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let messages = self.read_channel(&ChannelKey::Public, since, limit).await?;
        Ok(select_window(messages, since.is_some(), limit))
    }

    /// DM messages for `agent_id`, oldest-first
    ///
    /// Restricted to the channel shared with `other` when given, otherwise
    /// merged across every DM channel the agent participates in. Windowing
    /// follows [`read_public`](Self::read_public).
    pub async fn read_dm(
        &self,
        agent_id: &str,
        other: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let keys = match other {
            Some(other) => vec![ChannelKey::direct(agent_id, other)],
            None => self.dm_keys_for(agent_id).await?,
        };

        let mut merged = Vec::new();
        for key in &keys {
            merged.extend(self.read_channel(key, since, limit).await?);
        }
        merged.sort_by_key(|m| m.timestamp);

        Ok(select_window(merged, since.is_some(), limit))
    }

    /// Messages ever published to the public channel
    pub async fn count_public(&self) -> Result<u64> {
        Ok(self
            .storage
            .appended_total(&ChannelKey::Public.to_string())
            .await?)
    }

    /// Messages ever published to any DM channel of `agent_id`
    pub async fn count_dm(&self, agent_id: &str) -> Result<u64> {
        let mut total = 0;
        for key in self.dm_keys_for(agent_id).await? {
            total += self.storage.appended_total(&key.to_string()).await?;
        }
        Ok(total)
    }

    pub async fn stats(&self) -> Result<ChannelStats> {
        let dm_channels = self.storage.scan_keys(ChannelKey::DM_PATTERN).await?.len();
        Ok(ChannelStats {
            public_messages: self.count_public().await?,
            dm_channels,
        })
    }

    /// DM channel keys with `agent_id` as an exact participant
    async fn dm_keys_for(&self, agent_id: &str) -> Result<Vec<ChannelKey>> {
        let keys = self.storage.scan_keys(ChannelKey::DM_PATTERN).await?;
        Ok(keys
            .iter()
            .filter_map(|raw| ChannelKey::parse(raw))
            .filter(|key| key.involves(agent_id))
            .collect())
    }

    /// One channel's candidates for a read, oldest-first
    ///
    /// Without `since` only the newest `limit` entries are fetched. With it
    /// the whole retained channel is scanned, since it is capped anyway and
    /// timestamps of concurrent writers need not follow append order exactly.
    async fn read_channel(
        &self,
        key: &ChannelKey,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let raw_key = key.to_string();
        let mut messages = match since {
            None => {
                let payloads = self.storage.range(&raw_key, 0, limit).await?;
                decode(&raw_key, payloads)
            }
            Some(since) => {
                let mut all = Vec::new();
                let mut offset = 0;
                loop {
                    let page = self.storage.range(&raw_key, offset, SCAN_PAGE).await?;
                    let fetched = page.len();
                    all.extend(decode(&raw_key, page));
                    if fetched < SCAN_PAGE {
                        break;
                    }
                    offset += fetched;
                }
                all.retain(|m| m.timestamp > since);
                all
            }
        };

        // Pages arrive newest-first; flip so equal timestamps keep append order.
        messages.reverse();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }
}

/// Parse stored payloads, skipping (and logging) corrupt entries
fn decode(channel: &str, payloads: Vec<String>) -> Vec<Message> {
    payloads
        .into_iter()
        .filter_map(|raw| match serde_json::from_str::<Message>(&raw) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(channel, error = %e, "Skipping corrupt stored message");
                None
            }
        })
        .collect()
}

/// Apply the `limit` to an oldest-first list
fn select_window(mut messages: Vec<Message>, since_given: bool, limit: usize) -> Vec<Message> {
    if since_given {
        messages.truncate(limit);
    } else if messages.len() > limit {
        messages.drain(..messages.len() - limit);
    }
    messages
}

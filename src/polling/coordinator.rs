//! Polling coordinator
//!
//! Serves one poll for a bound session: picks the window start (explicit
//! lookback, else the session cursor), reads public and DM channels, merges
//! them by timestamp and moves the cursor to the poll time.

use super::session::{Session, SessionRegistry};
use crate::channels::{ChannelKind, ChannelStore, Message};
use crate::clock::Clock;
use crate::{RelayError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Direction of a DM relative to the polling agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// A message as presented to a poller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolledMessage {
    #[serde(flatten)]
    pub message: Message,
    pub kind: ChannelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

impl PolledMessage {
    fn tag(message: Message, agent_id: &str) -> Self {
        let kind = message.channel;
        let direction = match kind {
            ChannelKind::Public => None,
            ChannelKind::Dm if message.from_agent == agent_id => Some(Direction::Sent),
            ChannelKind::Dm => Some(Direction::Received),
        };
        Self {
            message,
            kind,
            direction,
        }
    }
}

/// Parameters of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    /// Window size in minutes; 0 means "since the session cursor"
    pub lookback_minutes: u32,
    pub limit: usize,
}

impl PollRequest {
    pub fn new(limit: usize) -> Self {
        Self {
            lookback_minutes: 0,
            limit,
        }
    }

    pub fn with_lookback(mut self, minutes: u32) -> Self {
        self.lookback_minutes = minutes;
        self
    }
}

/// Outcome of one poll
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub agent_id: String,
    pub messages: Vec<PolledMessage>,
    /// `messages.len() >= limit`: a hint to poll again, not a guarantee
    pub has_more: bool,
    /// Exclusive lower bound actually used
    pub since: DateTime<Utc>,
    pub lookback_applied: bool,
    /// New cursor position
    pub polled_at: DateTime<Utc>,
    pub total_public: u64,
    pub total_dm: u64,
}

pub struct PollingCoordinator {
    channels: Arc<ChannelStore>,
    sessions: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    max_limit: usize,
    max_lookback_minutes: u32,
}

impl PollingCoordinator {
    pub fn new(
        channels: Arc<ChannelStore>,
        sessions: Arc<SessionRegistry>,
        clock: Arc<dyn Clock>,
        max_limit: usize,
        max_lookback_minutes: u32,
    ) -> Self {
        Self {
            channels,
            sessions,
            clock,
            max_limit,
            max_lookback_minutes,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Bind a session with its cursor at the current time
    pub async fn bind(&self, session_id: &str, agent_id: &str) -> Result<Session> {
        self.sessions
            .bind(session_id, agent_id, self.clock.now())
            .await
    }

    /// Poll on behalf of a bound session
    ///
    /// The cursor only moves once every read has succeeded.
    ///
    /// # Errors
    /// `NotFound` for an unbound session, `ValidationFailed` for an
    /// out-of-range limit or lookback.
    pub async fn poll(&self, session_id: &str, request: PollRequest) -> Result<PollResult> {
        self.validate(&request)?;
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| RelayError::NotFound(format!("session '{}'", session_id)))?;

        let now = self.clock.now();
        let lookback_applied = request.lookback_minutes > 0;
        let since = if lookback_applied {
            now - Duration::minutes(i64::from(request.lookback_minutes))
        } else {
            session.last_poll
        };
        let agent_id = session.agent_id.as_str();

        let (public, direct, total_public, total_dm) = futures::try_join!(
            self.channels.read_public(Some(since), request.limit),
            self.channels
                .read_dm(agent_id, None, Some(since), request.limit),
            self.channels.count_public(),
            self.channels.count_dm(agent_id),
        )?;

        let mut messages: Vec<PolledMessage> = public
            .into_iter()
            .chain(direct)
            .map(|m| PolledMessage::tag(m, agent_id))
            .collect();
        messages.sort_by_key(|m| m.message.timestamp);
        let has_more = messages.len() >= request.limit;

        self.sessions.advance(session_id, now).await;

        tracing::debug!(
            session_id,
            agent_id,
            count = messages.len(),
            lookback_applied,
            "Poll served"
        );

        Ok(PollResult {
            agent_id: session.agent_id.clone(),
            messages,
            has_more,
            since,
            lookback_applied,
            polled_at: now,
            total_public,
            total_dm,
        })
    }

    fn validate(&self, request: &PollRequest) -> Result<()> {
        if request.limit == 0 || request.limit > self.max_limit {
            return Err(RelayError::validation(format!(
                "limit must be between 1 and {}",
                self.max_limit
            )));
        }
        if request.lookback_minutes > self.max_lookback_minutes {
            return Err(RelayError::validation(format!(
                "lookback_minutes must be between 0 and {}",
                self.max_lookback_minutes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{NewMessage, RetentionPolicy};
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;

    struct Fixture {
        coordinator: PollingCoordinator,
        channels: Arc<ChannelStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let channels = Arc::new(ChannelStore::new(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            RetentionPolicy::default(),
        ));
        let coordinator = PollingCoordinator::new(
            channels.clone(),
            Arc::new(SessionRegistry::new()),
            clock.clone(),
            100,
            1440,
        );
        Fixture {
            coordinator,
            channels,
            clock,
        }
    }

    async fn send(f: &Fixture, from: &str, to: Option<&str>, content: &str) {
        let draft = NewMessage::new(from, to.map(str::to_string), content, None, 10240).unwrap();
        f.channels.publish(draft).await.unwrap();
    }

    fn contents(result: &PollResult) -> Vec<&str> {
        result
            .messages
            .iter()
            .map(|m| m.message.content.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_unbound_session_is_not_found() {
        let f = fixture();
        let err = f.coordinator.poll("nope", PollRequest::new(10)).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cursor_advances() {
        let f = fixture();
        f.coordinator.bind("s1", "owl").await.unwrap();

        f.clock.advance_secs(1);
        send(&f, "fox", None, "first").await;
        f.clock.advance_secs(1);
        let first = f.coordinator.poll("s1", PollRequest::new(50)).await.unwrap();
        assert_eq!(contents(&first), vec!["first"]);

        f.clock.advance_secs(1);
        send(&f, "fox", None, "second").await;
        f.clock.advance_secs(1);
        let second = f.coordinator.poll("s1", PollRequest::new(50)).await.unwrap();
        assert_eq!(contents(&second), vec!["second"]);
        assert!(!second.lookback_applied);
        assert_eq!(second.since, first.polled_at);
    }

    #[tokio::test]
    async fn test_lookback_is_repeatable_and_moves_cursor() {
        let f = fixture();
        f.coordinator.bind("s1", "owl").await.unwrap();
        send(&f, "fox", None, "hello").await;
        f.clock.advance_secs(30);

        let request = PollRequest::new(50).with_lookback(5);
        let a = f.coordinator.poll("s1", request).await.unwrap();
        let b = f.coordinator.poll("s1", request).await.unwrap();
        assert_eq!(contents(&a), vec!["hello"]);
        assert_eq!(a.messages, b.messages);
        assert!(a.lookback_applied);

        let cursor = f.coordinator.poll("s1", PollRequest::new(50)).await.unwrap();
        assert!(cursor.messages.is_empty());
    }

    #[tokio::test]
    async fn test_merge_tags_kind_and_direction() {
        let f = fixture();
        f.coordinator.bind("s1", "owl").await.unwrap();
        f.clock.advance_secs(1);
        send(&f, "owl", Some("fox"), "owl to fox").await;
        f.clock.advance_secs(1);
        send(&f, "elk", None, "broadcast").await;
        f.clock.advance_secs(1);
        send(&f, "fox", Some("owl"), "fox to owl").await;
        send(&f, "fox", Some("elk"), "not for owl").await;

        let result = f.coordinator.poll("s1", PollRequest::new(50)).await.unwrap();
        assert_eq!(
            contents(&result),
            vec!["owl to fox", "broadcast", "fox to owl"]
        );
        let tags: Vec<_> = result
            .messages
            .iter()
            .map(|m| (m.kind, m.direction))
            .collect();
        assert_eq!(
            tags,
            vec![
                (ChannelKind::Dm, Some(Direction::Sent)),
                (ChannelKind::Public, None),
                (ChannelKind::Dm, Some(Direction::Received)),
            ]
        );
        assert_eq!(result.total_public, 1);
        assert_eq!(result.total_dm, 2);
    }

    #[tokio::test]
    async fn test_has_more_heuristic() {
        let f = fixture();
        f.coordinator.bind("s1", "owl").await.unwrap();
        f.clock.advance_secs(1);
        for i in 0..3 {
            send(&f, "fox", None, &format!("m{i}")).await;
        }
        let result = f.coordinator.poll("s1", PollRequest::new(3)).await.unwrap();
        assert!(result.has_more);
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_requests() {
        let f = fixture();
        f.coordinator.bind("s1", "owl").await.unwrap();
        for request in [
            PollRequest::new(0),
            PollRequest::new(101),
            PollRequest::new(10).with_lookback(1441),
        ] {
            assert!(matches!(
                f.coordinator.poll("s1", request).await,
                Err(RelayError::ValidationFailed(_))
            ));
        }
    }

    #[test]
    fn test_polled_message_json_is_flat() {
        let message = NewMessage::new("fox", Some("owl".into()), "hi", None, 100)
            .unwrap()
            .into_message(Utc::now());
        let polled = PolledMessage::tag(message, "owl");
        let json = serde_json::to_value(&polled).unwrap();
        assert_eq!(json["content"], "hi");
        assert_eq!(json["kind"], "dm");
        assert_eq!(json["direction"], "received");
    }
}

//! Session registry
//!
//! Maps caller-visible session ids to the agent they act as and the
//! timestamp of their last poll. Purely in-process: sessions vanish on
//! restart, and several sessions may share one agent.

use crate::{RelayError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// A bound session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub agent_id: String,
    pub last_poll: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `session_id` to `agent_id` with the cursor at `now`
    ///
    /// Rebinding a session to the agent it already has is a no-op that keeps
    /// the cursor.
    ///
    /// # Errors
    /// `ValidationFailed` if the session is bound to a different agent.
    pub async fn bind(
        &self,
        session_id: &str,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(session_id) {
            if existing.agent_id == agent_id {
                return Ok(existing.clone());
            }
            return Err(RelayError::validation(format!(
                "session '{}' is already bound to agent '{}'",
                session_id, existing.agent_id
            )));
        }

        let session = Session {
            agent_id: agent_id.to_string(),
            last_poll: now,
        };
        sessions.insert(session_id.to_string(), session.clone());
        tracing::debug!(session_id, agent_id, "Session bound");
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn unbind(&self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            tracing::debug!(session_id, "Session unbound");
        }
        removed
    }

    /// Move a session's cursor; returns false if the session is gone
    pub async fn advance(&self, session_id: &str, to: DateTime<Utc>) -> bool {
        match self.sessions.write().await.get_mut(session_id) {
            Some(session) => {
                session.last_poll = to;
                true
            }
            None => false,
        }
    }

    /// Distinct agents with at least one bound session
    pub async fn bound_agents(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .map(|s| s.agent_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_bind_and_rebind() {
        let registry = SessionRegistry::new();
        let t0 = Utc::now();

        registry.bind("s1", "fox", t0).await.unwrap();
        let again = registry
            .bind("s1", "fox", t0 + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(again.last_poll, t0);

        let err = registry.bind("s1", "owl", t0).await.unwrap_err();
        assert!(matches!(err, RelayError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_advance_and_unbind() {
        let registry = SessionRegistry::new();
        let t0 = Utc::now();
        registry.bind("s1", "fox", t0).await.unwrap();

        let t1 = t0 + Duration::seconds(10);
        assert!(registry.advance("s1", t1).await);
        assert_eq!(registry.get("s1").await.unwrap().last_poll, t1);

        assert!(registry.unbind("s1").await.is_some());
        assert!(!registry.advance("s1", t1).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_bound_agents_are_distinct() {
        let registry = SessionRegistry::new();
        let now = Utc::now();
        registry.bind("s1", "owl", now).await.unwrap();
        registry.bind("s2", "fox", now).await.unwrap();
        registry.bind("s3", "owl", now).await.unwrap();

        assert_eq!(registry.bound_agents().await, vec!["fox", "owl"]);
        assert_eq!(registry.len().await, 3);
    }
}

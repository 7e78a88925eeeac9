//! Agent records and their liveness states

use crate::{RelayError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest accepted agent id
pub const MAX_AGENT_ID_LEN: usize = 64;

/// Persisted agent status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            other => Err(format!("unknown agent status '{}'", other)),
        }
    }
}

/// Read-time liveness classification
///
/// `Stale` is never stored. It is what an `Active` record looks like once its
/// heartbeat is older than the stale threshold but before the sweep has
/// marked it `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Active,
    Stale,
    Inactive,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Active => "active",
            Liveness::Stale => "stale",
            Liveness::Inactive => "inactive",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub context_summary: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl AgentRecord {
    /// Fresh active record with both timestamps set to `now`
    pub fn new(
        agent_id: impl Into<String>,
        context_summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            context_summary: context_summary.into(),
            registered_at: now,
            last_heartbeat: now,
            status: AgentStatus::Active,
            endpoint: None,
        }
    }

    /// Time since the last heartbeat
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_heartbeat
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_threshold: Duration) -> bool {
        self.idle_for(now) >= stale_threshold
    }

    pub fn liveness(&self, now: DateTime<Utc>, stale_threshold: Duration) -> Liveness {
        match self.status {
            AgentStatus::Inactive => Liveness::Inactive,
            AgentStatus::Active if self.is_stale(now, stale_threshold) => Liveness::Stale,
            AgentStatus::Active => Liveness::Active,
        }
    }
}

/// Check an agent id before it is stored or used in a channel key
///
/// Ids are non-empty ASCII made of letters, digits, `-`, `_` and `.`. The
/// missing `:` is what lets a DM key always split back into its two ids.
pub fn validate_agent_id(agent_id: &str) -> Result<()> {
    if agent_id.is_empty() {
        return Err(RelayError::validation("agent_id must not be empty"));
    }
    if agent_id.len() > MAX_AGENT_ID_LEN {
        return Err(RelayError::validation(format!(
            "agent_id exceeds {} characters",
            MAX_AGENT_ID_LEN
        )));
    }
    if let Some(bad) = agent_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(RelayError::validation(format!(
            "agent_id contains invalid character {:?}",
            bad
        )));
    }
    Ok(())
}

/// Trim a context summary and enforce its length limit (in characters)
pub fn normalize_context_summary(summary: &str, max_chars: usize) -> Result<String> {
    let summary = summary.trim();
    let len = summary.chars().count();
    if len > max_chars {
        return Err(RelayError::validation(format!(
            "context_summary is {} characters, limit is {}",
            len, max_chars
        )));
    }
    Ok(summary.to_string())
}

//! Agent directory
//!
//! Owns every mutation of agent records: registration, heartbeats, context
//! updates and the periodic liveness sweep. Records are soft state: the
//! sweep only flips `status`, and hard deletion is a separate, opt-in purge.

use super::agent::{normalize_context_summary, validate_agent_id, AgentRecord, AgentStatus};
use crate::clock::Clock;
use crate::identity::{generate_unique_name, DEFAULT_MAX_ATTEMPTS};
use crate::storage::{AgentField, DirectoryStorage, FieldUpdate};
use crate::{RelayError, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Staleness and eviction thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    stale_threshold: Duration,
    removal_threshold: Duration,
    purge_after: Option<Duration>,
}

impl LivenessPolicy {
    /// # Errors
    /// `Config` unless `removal_threshold > stale_threshold > 0`.
    pub fn new(stale_threshold: Duration, removal_threshold: Duration) -> Result<Self> {
        if stale_threshold <= Duration::zero() {
            return Err(RelayError::Config(
                "stale threshold must be positive".to_string(),
            ));
        }
        if removal_threshold <= stale_threshold {
            return Err(RelayError::Config(format!(
                "removal threshold ({}s) must be greater than stale threshold ({}s)",
                removal_threshold.num_seconds(),
                stale_threshold.num_seconds()
            )));
        }
        Ok(Self {
            stale_threshold,
            removal_threshold,
            purge_after: None,
        })
    }

    /// Enable hard deletion of inactive records idle for longer than `grace`
    pub fn with_purge_after(mut self, grace: Duration) -> Result<Self> {
        if grace <= self.removal_threshold {
            return Err(RelayError::Config(format!(
                "purge grace ({}s) must be greater than removal threshold ({}s)",
                grace.num_seconds(),
                self.removal_threshold.num_seconds()
            )));
        }
        self.purge_after = Some(grace);
        Ok(self)
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    pub fn removal_threshold(&self) -> Duration {
        self.removal_threshold
    }

    pub fn purge_after(&self) -> Option<Duration> {
        self.purge_after
    }
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::seconds(120),
            removal_threshold: Duration::seconds(300),
            purge_after: None,
        }
    }
}

/// Registration, heartbeat and liveness bookkeeping for agents
pub struct AgentDirectory {
    storage: Arc<dyn DirectoryStorage>,
    clock: Arc<dyn Clock>,
    policy: LivenessPolicy,
    summary_max_chars: usize,
}

impl AgentDirectory {
    pub fn new(
        storage: Arc<dyn DirectoryStorage>,
        clock: Arc<dyn Clock>,
        policy: LivenessPolicy,
        summary_max_chars: usize,
    ) -> Self {
        Self {
            storage,
            clock,
            policy,
            summary_max_chars,
        }
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    /// Register a new agent
    ///
    /// # Errors
    /// `AlreadyExists` if the id is taken; the stored record is untouched.
    pub async fn register(&self, agent_id: &str, context_summary: &str) -> Result<AgentRecord> {
        self.register_with_endpoint(agent_id, context_summary, None)
            .await
    }

    /// Register a new agent that also advertises an endpoint
    pub async fn register_with_endpoint(
        &self,
        agent_id: &str,
        context_summary: &str,
        endpoint: Option<String>,
    ) -> Result<AgentRecord> {
        validate_agent_id(agent_id)?;
        let summary = normalize_context_summary(context_summary, self.summary_max_chars)?;

        let mut record = AgentRecord::new(agent_id, summary, self.clock.now());
        record.endpoint = endpoint;

        if !self.storage.put(&record).await? {
            tracing::debug!(agent_id, "Registration rejected, id taken");
            return Err(RelayError::AlreadyExists(format!("agent '{}'", agent_id)));
        }

        tracing::info!(agent_id, "Agent registered");
        Ok(record)
    }

    /// Generate an id no current record uses
    pub async fn generate_id(&self) -> Result<String> {
        generate_unique_name(
            |candidate| async move { Ok(self.storage.exists(&candidate).await?) },
            DEFAULT_MAX_ATTEMPTS,
        )
        .await
    }

    /// Refresh `last_heartbeat`, re-admitting an inactive agent
    pub async fn heartbeat(&self, agent_id: &str) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let fields = [
            AgentField::LastHeartbeat(now),
            AgentField::Status(AgentStatus::Active),
        ];

        match self.storage.update_fields(agent_id, &fields, None).await? {
            FieldUpdate::Missing => Err(RelayError::agent_not_found(agent_id)),
            _ => {
                tracing::trace!(agent_id, "Heartbeat");
                Ok(now)
            }
        }
    }

    pub async fn update_context(&self, agent_id: &str, context_summary: &str) -> Result<DateTime<Utc>> {
        let summary = normalize_context_summary(context_summary, self.summary_max_chars)?;
        let fields = [AgentField::ContextSummary(summary)];

        match self.storage.update_fields(agent_id, &fields, None).await? {
            FieldUpdate::Missing => Err(RelayError::agent_not_found(agent_id)),
            _ => {
                tracing::debug!(agent_id, "Context updated");
                Ok(self.clock.now())
            }
        }
    }

    pub async fn get(&self, agent_id: &str) -> Result<AgentRecord> {
        self.storage
            .get(agent_id)
            .await?
            .ok_or_else(|| RelayError::agent_not_found(agent_id))
    }

    pub async fn exists(&self, agent_id: &str) -> Result<bool> {
        Ok(self.storage.exists(agent_id).await?)
    }

    /// Fail with `NotFound` unless the agent is registered
    pub async fn ensure_exists(&self, agent_id: &str) -> Result<()> {
        if self.exists(agent_id).await? {
            Ok(())
        } else {
            Err(RelayError::agent_not_found(agent_id))
        }
    }

    /// Ids of agents with `status = Active`
    ///
    /// Without `include_stale`, agents whose heartbeat is at least the stale
    /// threshold old are left out even though their stored status is still
    /// active.
    pub async fn list(&self, include_stale: bool) -> Result<Vec<String>> {
        Ok(self
            .whois_all(include_stale)
            .await?
            .into_iter()
            .map(|r| r.agent_id)
            .collect())
    }

    /// Full records, filtered like [`list`](Self::list)
    pub async fn whois_all(&self, include_stale: bool) -> Result<Vec<AgentRecord>> {
        let now = self.clock.now();
        let stale = self.policy.stale_threshold;
        let visible = move |r: &AgentRecord| {
            r.status == AgentStatus::Active && (include_stale || !r.is_stale(now, stale))
        };
        Ok(self.storage.scan(&visible).await?)
    }

    /// Mark every active agent idle for at least the removal threshold as inactive
    ///
    /// The idle check is repeated inside each storage update, so a heartbeat
    /// that lands between the scan and the write wins.
    pub async fn sweep_inactive(&self) -> Result<usize> {
        let now = self.clock.now();
        let removal = self.policy.removal_threshold;
        let expired = move |r: &AgentRecord| {
            r.status == AgentStatus::Active && r.idle_for(now) >= removal
        };

        let candidates = self.storage.scan(&expired).await?;
        let mut marked = 0;
        for record in candidates {
            let outcome = self
                .storage
                .update_fields(
                    &record.agent_id,
                    &[AgentField::Status(AgentStatus::Inactive)],
                    Some(&expired),
                )
                .await?;
            if outcome == FieldUpdate::Applied {
                tracing::info!(agent_id = %record.agent_id, "Agent marked inactive");
                marked += 1;
            }
        }

        if marked > 0 {
            tracing::info!(count = marked, "Inactive sweep complete");
        }
        Ok(marked)
    }

    /// Hard-delete inactive records past the purge grace period
    ///
    /// A no-op returning 0 unless the policy has a purge grace.
    pub async fn purge_inactive(&self) -> Result<usize> {
        let Some(grace) = self.policy.purge_after else {
            return Ok(0);
        };
        let now = self.clock.now();
        let purgeable = move |r: &AgentRecord| {
            r.status == AgentStatus::Inactive && r.idle_for(now) >= grace
        };

        let candidates = self.storage.scan(&purgeable).await?;
        let mut purged = 0;
        for record in candidates {
            if self.storage.remove(&record.agent_id, Some(&purgeable)).await? == FieldUpdate::Applied
            {
                tracing::info!(agent_id = %record.agent_id, "Agent purged");
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Count of agents an active listing would show
    pub async fn active_count(&self) -> Result<usize> {
        Ok(self.whois_all(false).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;

    fn directory() -> (AgentDirectory, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let directory = AgentDirectory::new(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            LivenessPolicy::default(),
            255,
        );
        (directory, clock)
    }

    #[test]
    fn test_policy_requires_ordered_thresholds() {
        assert!(LivenessPolicy::new(Duration::seconds(120), Duration::seconds(120)).is_err());
        assert!(LivenessPolicy::new(Duration::seconds(0), Duration::seconds(10)).is_err());
        let policy = LivenessPolicy::new(Duration::seconds(10), Duration::seconds(20)).unwrap();
        assert!(policy.with_purge_after(Duration::seconds(20)).is_err());
        assert!(policy.with_purge_after(Duration::seconds(21)).is_ok());
    }

    #[tokio::test]
    async fn test_register_twice_keeps_original() {
        let (directory, clock) = directory();
        let first = directory.register("amber-fox-0001", "first").await.unwrap();
        clock.advance_secs(5);

        let err = directory.register("amber-fox-0001", "second").await.unwrap_err();
        assert!(matches!(err, RelayError::AlreadyExists(_)));

        let stored = directory.get("amber-fox-0001").await.unwrap();
        assert_eq!(stored.registered_at, first.registered_at);
        assert_eq!(stored.context_summary, "first");
    }

    #[tokio::test]
    async fn test_register_validates_inputs() {
        let (directory, _) = directory();
        assert!(matches!(
            directory.register("a:b", "x").await,
            Err(RelayError::ValidationFailed(_))
        ));
        assert!(matches!(
            directory.register("amber-fox-0001", &"x".repeat(256)).await,
            Err(RelayError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent() {
        let (directory, _) = directory();
        assert!(matches!(
            directory.heartbeat("nobody").await,
            Err(RelayError::NotFound(_))
        ));
        assert!(matches!(
            directory.update_context("nobody", "x").await,
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_then_inactive_then_readmitted() {
        let (directory, clock) = directory();
        directory.register("amber-fox-0001", "x").await.unwrap();

        clock.advance_secs(119);
        assert_eq!(directory.list(false).await.unwrap(), vec!["amber-fox-0001"]);

        clock.advance_secs(1);
        assert!(directory.list(false).await.unwrap().is_empty());
        assert_eq!(directory.list(true).await.unwrap(), vec!["amber-fox-0001"]);
        assert_eq!(directory.sweep_inactive().await.unwrap(), 0);

        clock.advance_secs(180);
        assert_eq!(directory.sweep_inactive().await.unwrap(), 1);
        assert_eq!(
            directory.get("amber-fox-0001").await.unwrap().status,
            AgentStatus::Inactive
        );
        assert!(directory.list(true).await.unwrap().is_empty());

        directory.heartbeat("amber-fox-0001").await.unwrap();
        assert_eq!(
            directory.get("amber-fox-0001").await.unwrap().status,
            AgentStatus::Active
        );
        assert_eq!(directory.list(false).await.unwrap(), vec!["amber-fox-0001"]);
    }

    #[tokio::test]
    async fn test_purge_requires_grace() {
        let (directory, clock) = directory();
        directory.register("amber-fox-0001", "x").await.unwrap();
        clock.advance_secs(3600);
        directory.sweep_inactive().await.unwrap();
        assert_eq!(directory.purge_inactive().await.unwrap(), 0);

        let purging = AgentDirectory::new(
            directory.storage.clone(),
            clock.clone(),
            LivenessPolicy::default()
                .with_purge_after(Duration::seconds(600))
                .unwrap(),
            255,
        );
        assert_eq!(purging.purge_inactive().await.unwrap(), 1);
        assert!(!purging.exists("amber-fox-0001").await.unwrap());
    }

    #[tokio::test]
    async fn test_generate_id_is_free() {
        let (directory, _) = directory();
        let id = directory.generate_id().await.unwrap();
        assert!(crate::identity::validate_name(&id));
        assert!(!directory.exists(&id).await.unwrap());
    }
}

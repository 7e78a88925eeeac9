//! Relay facade
//!
//! The one contract surface the transports call. Each operation validates
//! its inputs, checks that every agent it references exists, and then
//! delegates to the directory, the channel store or the polling coordinator.

pub mod scheduler;

pub use scheduler::{Scheduler, SchedulerCommand, SchedulerConfig, SchedulerEvent, SchedulerHandle};

use crate::channels::{ChannelStore, Message, NewMessage};
use crate::clock::{Clock, SystemClock};
use crate::config::{validate_config_result, LimitsConfig, LivenessConfig, RelayConfig};
use crate::directory::{AgentDirectory, AgentRecord, Liveness};
use crate::polling::{PollRequest, PollResult, PollingCoordinator, Session, SessionRegistry};
use crate::storage::{self, Backends, ChannelStorage};
use crate::{RelayError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Attempts at registering a freshly generated name before giving up
const REGISTER_RACE_RETRIES: usize = 3;

/// A bounded read from one channel view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// Snapshot for health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `healthy` or `unhealthy`
    pub status: &'static str,
    pub storage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_agents: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_messages: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dm_channels: Option<usize>,
    pub sessions: usize,
    pub uptime_secs: i64,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Builder for [`Relay`]
pub struct RelayBuilder {
    config: RelayConfig,
    clock: Option<Arc<dyn Clock>>,
    backends: Option<Backends>,
}

impl RelayBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            clock: None,
            backends: None,
        }
    }

    /// Use a custom time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use already-opened storage instead of the configured backend
    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Validate the configuration, open storage and wire the components
    pub fn build(self) -> Result<Relay> {
        validate_config_result(&self.config)?;
        let policy = self.config.liveness.policy()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let backends = match self.backends {
            Some(backends) => backends,
            None => storage::open(&self.config.storage)?,
        };

        let directory = Arc::new(AgentDirectory::new(
            backends.directory.clone(),
            clock.clone(),
            policy,
            self.config.limits.context_summary_max_chars,
        ));
        let channels = Arc::new(ChannelStore::new(
            backends.channels.clone(),
            clock.clone(),
            self.config.retention.policy(),
        ));
        let polling = PollingCoordinator::new(
            channels.clone(),
            Arc::new(SessionRegistry::new()),
            clock.clone(),
            self.config.limits.max_poll_limit,
            self.config.limits.max_lookback_minutes,
        );

        tracing::debug!(
            stale_secs = self.config.liveness.stale_threshold_secs,
            removal_secs = self.config.liveness.removal_threshold_secs,
            "Relay built"
        );

        Ok(Relay {
            started_at: clock.now(),
            directory,
            channels,
            polling,
            channel_storage: backends.channels,
            clock,
            limits: self.config.limits,
            liveness: self.config.liveness,
        })
    }
}

/// Presence-aware message relay
pub struct Relay {
    directory: Arc<AgentDirectory>,
    channels: Arc<ChannelStore>,
    polling: PollingCoordinator,
    channel_storage: Arc<dyn ChannelStorage>,
    clock: Arc<dyn Clock>,
    limits: LimitsConfig,
    liveness: LivenessConfig,
    started_at: DateTime<Utc>,
}

impl Relay {
    pub fn builder(config: RelayConfig) -> RelayBuilder {
        RelayBuilder::new(config)
    }

    /// Default configuration over in-memory storage
    pub fn in_memory() -> Result<Self> {
        RelayBuilder::new(RelayConfig::in_memory()).build()
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn liveness_config(&self) -> &LivenessConfig {
        &self.liveness
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    pub fn sessions(&self) -> &SessionRegistry {
        self.polling.sessions()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // Agents

    /// Register under a freshly generated name
    pub async fn register(&self, context_summary: &str) -> Result<AgentRecord> {
        self.register_with_endpoint(context_summary, None).await
    }

    /// Register under a freshly generated name, advertising an endpoint
    pub async fn register_with_endpoint(
        &self,
        context_summary: &str,
        endpoint: Option<String>,
    ) -> Result<AgentRecord> {
        for _ in 0..REGISTER_RACE_RETRIES {
            let agent_id = self.directory.generate_id().await?;
            match self
                .directory
                .register_with_endpoint(&agent_id, context_summary, endpoint.clone())
                .await
            {
                Err(RelayError::AlreadyExists(_)) => {
                    tracing::debug!(agent_id = %agent_id, "Generated name taken concurrently");
                }
                other => return other,
            }
        }
        Err(RelayError::ExhaustedAttempts {
            attempts: REGISTER_RACE_RETRIES,
        })
    }

    /// Register under a caller-chosen id
    pub async fn register_named(&self, agent_id: &str, context_summary: &str) -> Result<AgentRecord> {
        self.directory.register(agent_id, context_summary).await
    }

    pub async fn heartbeat(&self, agent_id: &str) -> Result<DateTime<Utc>> {
        self.directory.heartbeat(agent_id).await
    }

    pub async fn update_context(&self, agent_id: &str, context_summary: &str) -> Result<DateTime<Utc>> {
        self.directory.update_context(agent_id, context_summary).await
    }

    /// Agents that are active and not stale
    pub async fn list_active_agents(&self) -> Result<Vec<String>> {
        self.directory.list(false).await
    }

    pub async fn list_agents(&self, include_stale: bool) -> Result<Vec<String>> {
        self.directory.list(include_stale).await
    }

    pub async fn whois(&self, agent_id: &str) -> Result<AgentRecord> {
        self.directory.get(agent_id).await
    }

    /// Full records of every agent an active listing shows
    pub async fn whois_all(&self) -> Result<Vec<AgentRecord>> {
        self.directory.whois_all(false).await
    }

    /// Derived liveness of a record as of now
    pub fn liveness_of(&self, record: &AgentRecord) -> Liveness {
        record.liveness(self.clock.now(), self.directory.policy().stale_threshold())
    }

    pub async fn sweep_inactive(&self) -> Result<usize> {
        self.directory.sweep_inactive().await
    }

    pub async fn purge_inactive(&self) -> Result<usize> {
        self.directory.purge_inactive().await
    }

    // Messages

    pub async fn send_public(
        &self,
        from_agent: &str,
        content: &str,
        thread_id: Option<String>,
    ) -> Result<Message> {
        let draft = NewMessage::new(
            from_agent,
            None,
            content,
            thread_id,
            self.limits.message_max_bytes,
        )?;
        self.directory.ensure_exists(from_agent).await?;
        self.channels.publish(draft).await
    }

    /// Send a DM; both sender and recipient must be registered
    pub async fn send_dm(
        &self,
        from_agent: &str,
        to_agent: &str,
        content: &str,
        thread_id: Option<String>,
    ) -> Result<Message> {
        let draft = NewMessage::new(
            from_agent,
            Some(to_agent.to_string()),
            content,
            thread_id,
            self.limits.message_max_bytes,
        )?;
        self.directory.ensure_exists(from_agent).await?;
        self.directory.ensure_exists(to_agent).await?;
        self.channels.publish(draft).await
    }

    /// Post the public notice that greets a newly registered agent
    pub async fn announce_join(&self, record: &AgentRecord) -> Result<Message> {
        let notice = format!(
            "New agent joined: {} - {}",
            record.agent_id, record.context_summary
        );
        self.send_public(&record.agent_id, &notice, None).await
    }

    /// Read the public channel; `limit` defaults to the configured page size
    pub async fn read_public(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<MessagePage> {
        let limit = self.resolve_limit(limit)?;
        let messages = self.channels.read_public(since, limit).await?;
        Ok(page(messages, limit))
    }

    /// Read DMs of a registered agent, optionally with one peer only
    pub async fn read_dm(
        &self,
        agent_id: &str,
        other_agent_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<MessagePage> {
        let limit = self.resolve_limit(limit)?;
        self.directory.ensure_exists(agent_id).await?;
        let messages = self
            .channels
            .read_dm(agent_id, other_agent_id, since, limit)
            .await?;
        Ok(page(messages, limit))
    }

    pub async fn count_public(&self) -> Result<u64> {
        self.channels.count_public().await
    }

    pub async fn count_dm(&self, agent_id: &str) -> Result<u64> {
        self.channels.count_dm(agent_id).await
    }

    // Sessions

    /// Bind a session to a registered agent, cursor at now
    pub async fn bind_session(&self, session_id: &str, agent_id: &str) -> Result<Session> {
        self.directory.ensure_exists(agent_id).await?;
        self.polling.bind(session_id, agent_id).await
    }

    pub async fn unbind_session(&self, session_id: &str) -> Option<Session> {
        self.polling.sessions().unbind(session_id).await
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.polling.sessions().get(session_id).await
    }

    /// Poll request with the configured default page size
    pub fn poll_request(&self, lookback_minutes: u32, limit: Option<usize>) -> PollRequest {
        PollRequest::new(limit.unwrap_or(self.limits.default_poll_limit))
            .with_lookback(lookback_minutes)
    }

    pub async fn poll(&self, session_id: &str, request: PollRequest) -> Result<PollResult> {
        self.polling.poll(session_id, request).await
    }

    /// Heartbeat every agent that has a bound session
    ///
    /// Agents that no longer exist are skipped with a warning.
    pub async fn heartbeat_sessions(&self) -> Result<usize> {
        let mut refreshed = 0;
        for agent_id in self.polling.sessions().bound_agents().await {
            match self.directory.heartbeat(&agent_id).await {
                Ok(_) => refreshed += 1,
                Err(RelayError::NotFound(_)) => {
                    tracing::warn!(agent_id = %agent_id, "Session agent no longer registered");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(refreshed)
    }

    // Health

    pub async fn health(&self) -> HealthReport {
        let now = self.clock.now();
        let sessions = self.polling.sessions().len().await;
        let uptime_secs = (now - self.started_at).num_seconds();

        let reachable = async {
            self.channel_storage.ping().await?;
            let active = self.directory.active_count().await?;
            let stats = self.channels.stats().await?;
            Ok::<_, RelayError>((active, stats))
        };

        match reachable.await {
            Ok((active, stats)) => HealthReport {
                status: "healthy",
                storage: "ok".to_string(),
                active_agents: Some(active),
                public_messages: Some(stats.public_messages),
                dm_channels: Some(stats.dm_channels),
                sessions,
                uptime_secs,
                timestamp: now,
            },
            Err(e) => {
                tracing::error!(error = %e, "Health check failed");
                HealthReport {
                    status: "unhealthy",
                    storage: e.to_string(),
                    active_agents: None,
                    public_messages: None,
                    dm_channels: None,
                    sessions,
                    uptime_secs,
                    timestamp: now,
                }
            }
        }
    }

    fn resolve_limit(&self, limit: Option<usize>) -> Result<usize> {
        let limit = limit.unwrap_or(self.limits.default_poll_limit);
        if limit == 0 || limit > self.limits.max_poll_limit {
            return Err(RelayError::validation(format!(
                "limit must be between 1 and {}",
                self.limits.max_poll_limit
            )));
        }
        Ok(limit)
    }
}

fn page(messages: Vec<Message>, limit: usize) -> MessagePage {
    let has_more = messages.len() >= limit;
    MessagePage { messages, has_more }
}

//! Background maintenance scheduler
//!
//! One tokio task per relay instance. It ticks two intervals:
//! - sweep: marks idle agents inactive (and purges, when configured)
//! - heartbeat: refreshes every agent bound to a live session
//!
//! and listens for commands. Failures inside a tick are logged and the loop
//! carries on; only `Shutdown` (or dropping every command sender) ends it.

use super::Relay;
use crate::{RelayError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Commands that can be sent to a running scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run a sweep immediately
    SweepNow,
    /// Heartbeat session agents immediately
    HeartbeatNow,
    /// Stop the loop
    Shutdown,
}

/// Events emitted by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Started,
    Swept { marked_inactive: usize, purged: usize },
    HeartbeatsSent { agents: usize },
    TickFailed { task: &'static str, error: String },
    Stopped,
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sweep_interval: Duration,
    pub heartbeat_interval: Duration,
    pub event_channel_capacity: usize,
}

impl SchedulerConfig {
    /// Intervals from the relay's liveness configuration
    pub fn from_relay(relay: &Relay) -> Self {
        let liveness = relay.liveness_config();
        Self {
            sweep_interval: liveness.sweep_interval(),
            heartbeat_interval: liveness.heartbeat_interval(),
            event_channel_capacity: 64,
        }
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// Not yet started scheduler
pub struct Scheduler {
    relay: Arc<Relay>,
    config: SchedulerConfig,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self::with_config(relay.clone(), SchedulerConfig::from_relay(&relay))
    }

    pub fn with_config(relay: Arc<Relay>, config: SchedulerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            relay,
            config,
            event_tx,
        }
    }

    /// Subscribe before starting to see every event, including the first ticks
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// Spawn the loop on the current tokio runtime
    pub fn start(self) -> SchedulerHandle {
        let (command_tx, command_rx) = mpsc::channel(10);

        let task = tokio::spawn(run(
            self.relay,
            self.config,
            command_rx,
            self.event_tx.clone(),
        ));

        SchedulerHandle {
            command_tx,
            event_tx: self.event_tx,
            task,
        }
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Subscribe to scheduler events
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn send(&self, command: SchedulerCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RelayError::Other("scheduler is not running".to_string()))
    }

    pub async fn sweep_now(&self) -> Result<()> {
        self.send(SchedulerCommand::SweepNow).await
    }

    /// Ask the loop to stop and wait for it
    ///
    /// A task that was cancelled, or had already exited, is not an error.
    pub async fn stop(self) -> Result<()> {
        let _ = self.command_tx.send(SchedulerCommand::Shutdown).await;
        match self.task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(RelayError::Other(format!("scheduler task failed: {}", e))),
        }
    }

    /// Cancel the task without waiting
    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn run(
    relay: Arc<Relay>,
    config: SchedulerConfig,
    mut command_rx: mpsc::Receiver<SchedulerCommand>,
    event_tx: broadcast::Sender<SchedulerEvent>,
) {
    let mut sweep = tokio::time::interval(config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        sweep_secs = config.sweep_interval.as_secs(),
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        "Scheduler started"
    );
    let _ = event_tx.send(SchedulerEvent::Started);

    loop {
        tokio::select! {
            _ = sweep.tick() => run_sweep(&relay, &event_tx).await,
            _ = heartbeat.tick() => run_heartbeats(&relay, &event_tx).await,
            cmd = command_rx.recv() => match cmd {
                Some(SchedulerCommand::SweepNow) => run_sweep(&relay, &event_tx).await,
                Some(SchedulerCommand::HeartbeatNow) => run_heartbeats(&relay, &event_tx).await,
                Some(SchedulerCommand::Shutdown) | None => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
            },
        }
    }

    let _ = event_tx.send(SchedulerEvent::Stopped);
}

async fn run_sweep(relay: &Relay, event_tx: &broadcast::Sender<SchedulerEvent>) {
    let outcome = async {
        let marked_inactive = relay.sweep_inactive().await?;
        let purged = relay.purge_inactive().await?;
        Ok::<_, RelayError>((marked_inactive, purged))
    }
    .await;

    let event = match outcome {
        Ok((marked_inactive, purged)) => {
            tracing::debug!(marked_inactive, purged, "Sweep tick");
            SchedulerEvent::Swept {
                marked_inactive,
                purged,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Sweep failed");
            SchedulerEvent::TickFailed {
                task: "sweep",
                error: e.to_string(),
            }
        }
    };
    let _ = event_tx.send(event);
}

async fn run_heartbeats(relay: &Relay, event_tx: &broadcast::Sender<SchedulerEvent>) {
    let event = match relay.heartbeat_sessions().await {
        Ok(agents) => {
            tracing::trace!(agents, "Heartbeat tick");
            SchedulerEvent::HeartbeatsSent { agents }
        }
        Err(e) => {
            tracing::error!(error = %e, "Session heartbeats failed");
            SchedulerEvent::TickFailed {
                task: "heartbeat",
                error: e.to_string(),
            }
        }
    };
    let _ = event_tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RelayConfig;
    use crate::directory::AgentStatus;

    fn quiet_config() -> SchedulerConfig {
        SchedulerConfig {
            sweep_interval: Duration::from_secs(3600),
            heartbeat_interval: Duration::from_secs(3600),
            event_channel_capacity: 16,
        }
    }

    async fn next_sweep(events: &mut broadcast::Receiver<SchedulerEvent>) -> SchedulerEvent {
        loop {
            let event = events.recv().await.unwrap();
            if matches!(event, SchedulerEvent::Swept { .. }) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_sweep_now_marks_inactive() {
        let clock = Arc::new(ManualClock::starting_now());
        let relay = Arc::new(
            Relay::builder(RelayConfig::in_memory())
                .with_clock(clock.clone())
                .build()
                .unwrap(),
        );
        relay.register_named("fox", "x").await.unwrap();

        let scheduler = Scheduler::with_config(relay.clone(), quiet_config());
        let mut events = scheduler.subscribe();
        let handle = scheduler.start();

        // First interval ticks fire immediately; drain that sweep.
        next_sweep(&mut events).await;

        clock.advance_secs(301);
        handle.sweep_now().await.unwrap();
        assert_eq!(
            next_sweep(&mut events).await,
            SchedulerEvent::Swept {
                marked_inactive: 1,
                purged: 0
            }
        );
        assert_eq!(
            relay.whois("fox").await.unwrap().status,
            AgentStatus::Inactive
        );

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_after_abort_is_ok() {
        let relay = Arc::new(Relay::in_memory().unwrap());
        let handle = Scheduler::with_config(relay, quiet_config()).start();
        handle.abort();
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_event() {
        let relay = Arc::new(Relay::in_memory().unwrap());
        let scheduler = Scheduler::with_config(relay, quiet_config());
        let mut events = scheduler.subscribe();
        let handle = scheduler.start();
        handle.send(SchedulerCommand::Shutdown).await.unwrap();

        loop {
            if events.recv().await.unwrap() == SchedulerEvent::Stopped {
                break;
            }
        }
        handle.stop().await.unwrap();
    }
}

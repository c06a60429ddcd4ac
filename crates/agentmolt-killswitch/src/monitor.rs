//! Background kill-switch monitor
//!
//! Polls one agent's kill state on a tokio task. The first poll that sees
//! `killed = true` fires the reaction exactly once and ends the task. The
//! default reaction cancels the monitor's kill token; watched code selects
//! on [`KillSwitch::kill_token`] to unwind.

use agentmolt_core::{Agent, ControlPlane, Error, KillSwitchConfig, Result};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Monitor lifecycle. `KilledObserved` and `Stopped` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Running,
    KilledObserved,
    Stopped,
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::KilledObserved | Self::Stopped)
    }
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::KilledObserved => "killed_observed",
            Self::Stopped => "stopped",
        })
    }
}

pub type KillCallback = Box<dyn FnOnce(&Agent) + Send + 'static>;

pub struct KillSwitch {
    plane: Arc<dyn ControlPlane>,
    agent_id: String,
    poll_interval: Duration,
    reaction: Option<KillCallback>,
    kill_token: CancellationToken,
    stop: CancellationToken,
    state: Arc<watch::Sender<MonitorState>>,
    handle: Option<JoinHandle<()>>,
}

impl KillSwitch {
    pub fn new(
        plane: Arc<dyn ControlPlane>,
        agent_id: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self> {
        if poll_interval.is_zero() {
            return Err(Error::validation("poll interval must be positive"));
        }
        let (state, _) = watch::channel(MonitorState::Idle);
        Ok(Self {
            plane,
            agent_id: agent_id.into(),
            poll_interval,
            reaction: None,
            kill_token: CancellationToken::new(),
            stop: CancellationToken::new(),
            state: Arc::new(state),
            handle: None,
        })
    }

    pub fn from_config(
        plane: Arc<dyn ControlPlane>,
        agent_id: impl Into<String>,
        config: &KillSwitchConfig,
    ) -> Result<Self> {
        Self::new(plane, agent_id, config.poll_interval()?)
    }

    /// Replace the default reaction. Must be set before [`start`](Self::start).
    pub fn on_kill(mut self, callback: impl FnOnce(&Agent) + Send + 'static) -> Self {
        self.reaction = Some(Box::new(callback));
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Cancelled when a kill is observed and no callback was supplied.
    pub fn kill_token(&self) -> CancellationToken {
        self.kill_token.clone()
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    /// Spawn the poll task. Must run inside a tokio runtime. Calling it on a
    /// running monitor is a no-op; a finished monitor cannot be restarted.
    pub fn start(&mut self) -> Result<()> {
        match self.state() {
            MonitorState::Running => return Ok(()),
            MonitorState::KilledObserved | MonitorState::Stopped => {
                return Err(Error::validation(format!(
                    "kill switch for agent {} has already finished ({})",
                    self.agent_id,
                    self.state()
                )));
            }
            MonitorState::Idle => {}
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::validation("kill switch must be started inside a tokio runtime"))?;

        let poller = Poller {
            plane: self.plane.clone(),
            agent_id: self.agent_id.clone(),
            poll_interval: self.poll_interval,
            reaction: self.reaction.take(),
            kill_token: self.kill_token.clone(),
            stop: self.stop.clone(),
            state: self.state.clone(),
        };
        self.state.send_replace(MonitorState::Running);
        self.handle = Some(runtime.spawn(poller.run()));
        info!(
            "Kill switch polling started for agent {} every {:?}",
            self.agent_id, self.poll_interval
        );
        Ok(())
    }

    /// Cancel polling and wait for the task to finish. Takes effect within
    /// one poll interval. A reaction already firing runs to completion.
    /// No-op once a kill was observed.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        self.join().await;
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = MonitorState::Stopped;
            true
        });
    }

    /// Wait for the poll task to end on its own (kill observed or stopped).
    /// Returns immediately if the monitor was never started.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Kill switch task for agent {} failed: {}", self.agent_id, e);
            }
        }
    }
}

impl Drop for KillSwitch {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// State moved into the spawned task.
struct Poller {
    plane: Arc<dyn ControlPlane>,
    agent_id: String,
    poll_interval: Duration,
    reaction: Option<KillCallback>,
    kill_token: CancellationToken,
    stop: CancellationToken,
    state: Arc<watch::Sender<MonitorState>>,
}

impl Poller {
    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!("Kill switch for agent {} stopped", self.agent_id);
                    self.state.send_replace(MonitorState::Stopped);
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let plane = self.plane.clone();
            let agent_id = self.agent_id.clone();
            let polled = tokio::task::spawn_blocking(move || plane.get_agent(&agent_id)).await;
            match polled {
                Ok(Ok(agent)) if agent.killed => {
                    self.fire(agent);
                    return;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Kill switch poll for agent {} failed: {}", self.agent_id, e),
                Err(e) => warn!("Kill switch poll for agent {} panicked: {}", self.agent_id, e),
            }
        }
    }

    fn fire(self, agent: Agent) {
        warn!("Agent {} is killed, triggering kill reaction", agent.id);
        match self.reaction {
            Some(callback) => {
                // A panicking reaction must not leave the monitor stuck in Running.
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&agent)));
                if outcome.is_err() {
                    error!("Kill reaction for agent {} panicked", agent.id);
                }
            }
            None => {
                error!("Kill signal received for agent {}, cancelling kill token", agent.id);
                self.kill_token.cancel();
            }
        }
        self.state.send_replace(MonitorState::KilledObserved);
    }
}

/// Kill an agent right away, bypassing any monitor.
pub fn kill_now(plane: &dyn ControlPlane, agent_id: &str) -> Result<Agent> {
    let agent = plane.kill(agent_id)?;
    info!("Kill switch engaged for agent {}", agent_id);
    Ok(agent)
}

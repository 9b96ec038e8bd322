use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::execution::{ExecutionContext, SessionHandle};
use crate::orchestrator::OrchestratorApi;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub request_timeout: Duration,
    pub max_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            request_timeout: crate::orchestrator::DEFAULT_REQUEST_TIMEOUT,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("Lost connection to execution. Session may have expired or server is unavailable.")]
    LostConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPhase {
    #[default]
    Idle,
    Polling,
    /// The execution reached a terminal state.
    Finished,
    /// Too many consecutive fetch failures.
    LostConnection,
}

/// Consecutive-failure bookkeeping for one handle.
#[derive(Debug)]
pub struct PollSession {
    max_failures: u32,
    failures: u32,
    phase: PollPhase,
}

impl PollSession {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            failures: 0,
            phase: PollPhase::Polling,
        }
    }

    pub fn on_success(&mut self, context: &ExecutionContext) -> PollPhase {
        self.failures = 0;
        if context.state.is_terminal() {
            self.phase = PollPhase::Finished;
        }
        self.phase
    }

    pub fn on_failure(&mut self) -> PollPhase {
        self.failures += 1;
        if self.failures >= self.max_failures {
            self.phase = PollPhase::LostConnection;
        }
        self.phase
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }
}

/// What the poller currently knows about the tracked execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionSnapshot {
    pub session: Option<SessionHandle>,
    pub context: Option<ExecutionContext>,
    pub phase: PollPhase,
    pub consecutive_failures: u32,
    pub(crate) generation: u64,
}

impl ExecutionSnapshot {
    pub fn error(&self) -> Option<PollError> {
        match self.phase {
            PollPhase::LostConnection => Some(PollError::LostConnection),
            _ => None,
        }
    }
}

/// Periodically fetches the context of one session at a time.
pub struct ExecutionPoller {
    api: Arc<dyn OrchestratorApi>,
    config: PollConfig,
    snapshot_tx: Arc<watch::Sender<ExecutionSnapshot>>,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl ExecutionPoller {
    pub fn new(api: Arc<dyn OrchestratorApi>, config: PollConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(ExecutionSnapshot::default());
        Self {
            api,
            config,
            snapshot_tx: Arc::new(snapshot_tx),
            generation: 0,
            task: None,
        }
    }

    /// Switches polling to `session`, tearing down any previous loop first.
    /// `None` stops polling.
    pub fn track(&mut self, session: Option<SessionHandle>) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;

        let Some(session) = session else {
            let generation = self.generation;
            self.snapshot_tx.send_replace(ExecutionSnapshot {
                generation,
                ..Default::default()
            });
            return;
        };

        tracing::info!(session = %session, "polling execution");
        self.snapshot_tx.send_replace(ExecutionSnapshot {
            session: Some(session.clone()),
            phase: PollPhase::Polling,
            generation: self.generation,
            ..Default::default()
        });

        let poll_loop = PollLoop {
            api: self.api.clone(),
            config: self.config,
            session,
            generation: self.generation,
            snapshot_tx: self.snapshot_tx.clone(),
        };
        self.task = Some(tokio::spawn(poll_loop.run()));
    }

    pub fn stop(&mut self) {
        self.track(None);
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionSnapshot> {
        self.snapshot_tx.subscribe()
    }
}

impl Drop for ExecutionPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct PollLoop {
    api: Arc<dyn OrchestratorApi>,
    config: PollConfig,
    session: SessionHandle,
    generation: u64,
    snapshot_tx: Arc<watch::Sender<ExecutionSnapshot>>,
}

impl PollLoop {
    async fn run(self) {
        let mut state = PollSession::new(self.config.max_failures);
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let fetch = self.api.fetch_context(&self.session);
            let fetched = timeout(self.config.request_timeout, fetch).await;
            let phase = match fetched {
                Ok(Ok(context)) => {
                    let phase = state.on_success(&context);
                    if phase == PollPhase::Finished {
                        tracing::info!(session = %self.session, state = %context.state, "execution finished");
                    }
                    self.publish(|snapshot| snapshot.context = Some(context), &state);
                    phase
                }
                Ok(Err(e)) => {
                    tracing::warn!(session = %self.session, "failed to fetch execution context: {}", e);
                    let phase = state.on_failure();
                    self.publish(|_| {}, &state);
                    phase
                }
                Err(_) => {
                    tracing::warn!(session = %self.session, "execution context fetch timed out");
                    let phase = state.on_failure();
                    self.publish(|_| {}, &state);
                    phase
                }
            };

            match phase {
                PollPhase::Polling => continue,
                PollPhase::LostConnection => {
                    tracing::error!(session = %self.session, "{}", PollError::LostConnection);
                    break;
                }
                PollPhase::Finished | PollPhase::Idle => break,
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ExecutionSnapshot), state: &PollSession) {
        self.snapshot_tx.send_if_modified(|snapshot| {
            // a newer track() owns the snapshot now
            if snapshot.generation != self.generation {
                return false;
            }
            update(snapshot);
            snapshot.phase = state.phase();
            snapshot.consecutive_failures = state.failures();
            true
        });
    }
}

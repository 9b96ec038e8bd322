//! Reconnect state machine, free of sockets and timers.
//!
//! The driver feeds socket and timer events in and acts on the resulting
//! state; every transition rule lives here so it can be tested directly.

use std::fmt;
use std::time::Duration;

use crate::connection::config::BackoffPolicy;
use crate::connection::error::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect budget exhausted. Only `reset` leaves this state.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting { attempt, delay } => {
                write!(f, "Reconnecting(attempt={}, delay={}ms)", attempt, delay.as_millis())
            }
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// How a socket went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Explicit disconnect or a close frame from the server.
    Clean,
    /// Transport error, failed dial, or stream ended without a close frame.
    Unclean,
}

#[derive(Debug, Clone)]
pub struct ConnectionSession {
    state: ConnectionState,
    attempts: u32,
    policy: BackoffPolicy,
}

impl ConnectionSession {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns `Ok(true)` when a dial should start.
    pub fn connect(&mut self) -> Result<bool, ConnectionError> {
        match self.state {
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                Ok(true)
            }
            ConnectionState::Failed => Err(ConnectionError::Failed(self.attempts)),
            _ => Ok(false),
        }
    }

    pub fn on_open(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.attempts = 0;
            self.state = ConnectionState::Connected;
        } else {
            tracing::debug!(state = %self.state, "ignoring open outside Connecting");
        }
    }

    pub fn on_close(&mut self, kind: CloseKind) -> ConnectionState {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            tracing::debug!(state = %self.state, "ignoring close outside an active socket");
            return self.state;
        }

        self.state = match kind {
            CloseKind::Clean => ConnectionState::Disconnected,
            CloseKind::Unclean if self.attempts < self.policy.max_attempts => {
                ConnectionState::Reconnecting {
                    attempt: self.attempts,
                    delay: self.policy.delay_for(self.attempts),
                }
            }
            CloseKind::Unclean => ConnectionState::Failed,
        };
        self.state
    }

    /// The reconnect delay elapsed.
    pub fn on_retry_timer(&mut self) {
        if let ConnectionState::Reconnecting { .. } = self.state {
            self.attempts += 1;
            self.state = ConnectionState::Connecting;
        }
    }

    /// Drops the socket and any pending reconnect. `Failed` is left alone.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Failed {
            self.attempts = 0;
            self.state = ConnectionState::Disconnected;
        }
    }

    pub fn reset(&mut self) {
        if self.state == ConnectionState::Failed {
            self.attempts = 0;
            self.state = ConnectionState::Disconnected;
        }
    }
}

impl Default for ConnectionSession {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_once(session: &mut ConnectionSession) -> ConnectionState {
        session.on_close(CloseKind::Unclean)
    }

    #[test]
    fn test_initial_state() {
        let session = ConnectionSession::default();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.attempts(), 0);
    }

    #[test]
    fn test_open_and_clean_close() {
        let mut session = ConnectionSession::default();
        assert_eq!(session.connect(), Ok(true));
        assert_eq!(session.state(), ConnectionState::Connecting);
        session.on_open();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.on_close(CloseKind::Clean), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_is_idempotent_while_active() {
        let mut session = ConnectionSession::default();
        session.connect().unwrap();
        assert_eq!(session.connect(), Ok(false));
        session.on_open();
        assert_eq!(session.connect(), Ok(false));
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_backoff_sequence_then_failed() {
        let mut session = ConnectionSession::default();
        session.connect().unwrap();
        session.on_open();

        let mut delays = vec![];
        loop {
            match fail_once(&mut session) {
                ConnectionState::Reconnecting { attempt, delay } => {
                    assert_eq!(attempt as usize, delays.len());
                    delays.push(delay.as_millis() as u64);
                    session.on_retry_timer();
                    assert_eq!(session.state(), ConnectionState::Connecting);
                }
                ConnectionState::Failed => break,
                other => panic!("unexpected state {other}"),
            }
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(session.state(), ConnectionState::Failed);

        // no further timers from Failed
        assert_eq!(fail_once(&mut session), ConnectionState::Failed);
        session.on_retry_timer();
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_open_resets_attempt_counter() {
        let mut session = ConnectionSession::default();
        session.connect().unwrap();
        session.on_open();

        for _ in 0..3 {
            fail_once(&mut session);
            session.on_retry_timer();
        }
        assert_eq!(session.attempts(), 3);

        session.on_open();
        assert_eq!(session.attempts(), 0);
        assert_eq!(
            fail_once(&mut session),
            ConnectionState::Reconnecting {
                attempt: 0,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[test]
    fn test_failed_requires_reset() {
        let mut session = ConnectionSession::new(BackoffPolicy {
            max_attempts: 0,
            ..BackoffPolicy::default()
        });
        session.connect().unwrap();
        assert_eq!(fail_once(&mut session), ConnectionState::Failed);
        assert_eq!(session.connect(), Err(ConnectionError::Failed(0)));

        session.reset();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.connect(), Ok(true));
    }

    #[test]
    fn test_reset_outside_failed_is_a_no_op() {
        let mut session = ConnectionSession::default();
        session.connect().unwrap();
        session.on_open();
        session.reset();
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_disconnect_cancels_reconnect() {
        let mut session = ConnectionSession::default();
        session.connect().unwrap();
        fail_once(&mut session);
        assert!(matches!(session.state(), ConnectionState::Reconnecting { .. }));

        session.disconnect();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        session.on_retry_timer();
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}

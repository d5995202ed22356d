//! Per-channel connection state machine.
//!
//! Provides a `ConnectionState` enum that models the full lifecycle of one
//! channel, with validated transitions that return `Result` instead of
//! panicking. The session task is the only owner of a `StateMachine`;
//! everything else reads the published state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::TransportError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current lifecycle state of a channel.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲              │  ▲            │
///       │              ▼  │            ▼
///       │           Reconnecting ◄─────┘
///       │              │
///       │              ▼
///       └─connect()── Failed
/// ```
///
/// Every state can move to `Disconnected` through an explicit
/// `disconnect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket and nothing scheduled. Initial state.
    #[default]
    Disconnected,

    /// A connect attempt is in flight.
    Connecting,

    /// Socket open; frames flow both ways.
    Connected,

    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,

    /// Attempts exhausted. Terminal until an explicit `connect()`.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// `true` for states where an explicit `connect()` starts a new attempt.
    pub fn accepts_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, to) {
            // disconnect() is valid from anywhere except where we already are.
            (Disconnected, Disconnected) => false,
            (_, Disconnected) => true,

            (Disconnected | Failed, Connecting) => true,
            (Reconnecting, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting | Connected, Reconnecting) => true,
            (Connecting | Reconnecting, Failed) => true,
            _ => false,
        }
    }
}

// ── Transition ───────────────────────────────────────────────────

/// A completed state change, handed to observers after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

// ── StateMachine ─────────────────────────────────────────────────

/// Single source of truth for one channel's lifecycle.
#[derive(Debug)]
pub struct StateMachine {
    state: ConnectionState,
    since: Instant,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            since: Instant::now(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// When the machine entered its current state.
    pub fn since(&self) -> Instant {
        self.since
    }

    /// Move to `to` if the edge exists. The new state is in place before
    /// this returns, so anything notified with the `Transition` reads it.
    pub fn transition(&mut self, to: ConnectionState) -> Result<Transition, TransportError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(TransportError::InvalidTransition { from, to });
        }
        self.state = to;
        self.since = Instant::now();
        Ok(Transition { from, to })
    }

    // ── Named transitions ────────────────────────────────────────

    /// `connect()`: valid from `Disconnected` and `Failed`.
    ///
    /// Returns `Ok(None)` when the request is a no-op (already connecting,
    /// connected, or waiting to reconnect).
    pub fn begin_connect(&mut self) -> Result<Option<Transition>, TransportError> {
        if !self.state.accepts_connect() {
            return Ok(None);
        }
        self.transition(ConnectionState::Connecting).map(Some)
    }

    /// The backoff timer fired.
    pub fn begin_retry(&mut self) -> Result<Transition, TransportError> {
        match self.state {
            ConnectionState::Reconnecting => self.transition(ConnectionState::Connecting),
            from => Err(TransportError::InvalidTransition {
                from,
                to: ConnectionState::Connecting,
            }),
        }
    }

    /// The socket opened.
    pub fn opened(&mut self) -> Result<Transition, TransportError> {
        self.transition(ConnectionState::Connected)
    }

    /// The connection attempt failed or the live link dropped, and a retry
    /// is scheduled.
    pub fn schedule_retry(&mut self) -> Result<Transition, TransportError> {
        self.transition(ConnectionState::Reconnecting)
    }

    /// Reconnection gave up (or is disabled for a failed connect).
    pub fn give_up(&mut self) -> Result<Transition, TransportError> {
        self.transition(ConnectionState::Failed)
    }

    /// `disconnect()` or a dropped link without auto-reconnect.
    ///
    /// Returns `None` when already disconnected.
    pub fn disconnect(&mut self) -> Option<Transition> {
        self.transition(ConnectionState::Disconnected).ok()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.state(), ConnectionState::Disconnected);

        let t = sm.begin_connect().unwrap().unwrap();
        assert_eq!(t.from, ConnectionState::Disconnected);
        assert_eq!(t.to, ConnectionState::Connecting);

        sm.opened().unwrap();
        assert!(sm.state().is_connected());

        sm.schedule_retry().unwrap();
        sm.begin_retry().unwrap();
        sm.opened().unwrap();

        let t = sm.disconnect().unwrap();
        assert_eq!(t.from, ConnectionState::Connected);
        assert_eq!(sm.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_is_idempotent() {
        let mut sm = StateMachine::new();
        sm.begin_connect().unwrap();
        assert!(sm.begin_connect().unwrap().is_none());
        sm.opened().unwrap();
        assert!(sm.begin_connect().unwrap().is_none());
        assert!(sm.state().is_connected());
    }

    #[test]
    fn connect_is_noop_while_reconnecting() {
        let mut sm = StateMachine::new();
        sm.begin_connect().unwrap();
        sm.schedule_retry().unwrap();
        assert!(sm.begin_connect().unwrap().is_none());
        assert_eq!(sm.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn disconnect_when_disconnected_is_noop() {
        let mut sm = StateMachine::new();
        assert!(sm.disconnect().is_none());
    }

    #[test]
    fn failed_only_reachable_from_connecting_or_reconnecting() {
        let mut sm = StateMachine::new();
        assert!(sm.give_up().is_err());

        sm.begin_connect().unwrap();
        sm.opened().unwrap();
        assert!(sm.give_up().is_err());

        sm.schedule_retry().unwrap();
        sm.give_up().unwrap();
        assert_eq!(sm.state(), ConnectionState::Failed);
    }

    #[test]
    fn failed_accepts_explicit_connect() {
        let mut sm = StateMachine::new();
        sm.begin_connect().unwrap();
        sm.give_up().unwrap();
        let t = sm.begin_connect().unwrap().unwrap();
        assert_eq!(t.from, ConnectionState::Failed);
        assert_eq!(t.to, ConnectionState::Connecting);
    }

    #[test]
    fn invalid_transition_reports_both_states() {
        let mut sm = StateMachine::new();
        let err = sm.opened().unwrap_err();
        assert_eq!(
            err,
            TransportError::InvalidTransition {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Connected,
            }
        );
        // Failed attempt leaves the state alone.
        assert_eq!(sm.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn begin_retry_requires_reconnecting() {
        let mut sm = StateMachine::new();
        assert!(sm.begin_retry().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}

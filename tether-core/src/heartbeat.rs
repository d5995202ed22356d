//! Heartbeat monitor for silently dead connections.
//!
//! The monitor holds no timer of its own. The session task asks it for the
//! next deadline, sleeps until then, and calls [`HeartbeatMonitor::poll`]
//! to learn whether a probe is due or the connection has gone quiet for
//! too long. Any inbound frame counts as a response.

use tokio::time::Instant;

use crate::config::HeartbeatConfig;

/// Outcome of a heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing to do yet.
    Idle,
    /// Send a `ping` frame and call [`HeartbeatMonitor::probe_sent`].
    SendProbe,
    /// A probe went unanswered for longer than the timeout.
    TimedOut,
}

/// Timestamps for one connected period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    pub started_at: Instant,
    pub last_probe_sent: Option<Instant>,
    pub last_response: Option<Instant>,
}

impl HeartbeatState {
    fn awaiting_response(&self) -> Option<Instant> {
        let probe = self.last_probe_sent?;
        match self.last_response {
            Some(seen) if seen >= probe => None,
            _ => Some(probe),
        }
    }

    fn last_event(&self) -> Instant {
        [self.last_probe_sent, self.last_response]
            .into_iter()
            .flatten()
            .fold(self.started_at, Instant::max)
    }
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Option<HeartbeatState>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Begin monitoring a freshly connected link. No-op when disabled.
    pub fn start(&mut self, now: Instant) {
        if !self.config.enabled {
            return;
        }
        self.state = Some(HeartbeatState {
            started_at: now,
            last_probe_sent: None,
            last_response: None,
        });
    }

    /// Stop and forget everything.
    pub fn stop(&mut self) {
        self.state = None;
    }

    pub fn is_running(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&HeartbeatState> {
        self.state.as_ref()
    }

    pub fn record_activity(&mut self, now: Instant) {
        if let Some(state) = self.state.as_mut() {
            state.last_response = Some(now);
        }
    }

    pub fn probe_sent(&mut self, now: Instant) {
        if let Some(state) = self.state.as_mut() {
            state.last_probe_sent = Some(now);
        }
    }

    /// When [`poll`](Self::poll) next has something to report.
    pub fn next_deadline(&self) -> Option<Instant> {
        let state = self.state.as_ref()?;
        Some(match state.awaiting_response() {
            Some(probe) => probe + self.config.timeout(),
            None => state.last_event() + self.config.interval(),
        })
    }

    pub fn poll(&self, now: Instant) -> HeartbeatAction {
        let Some(state) = self.state.as_ref() else {
            return HeartbeatAction::Idle;
        };
        match state.awaiting_response() {
            Some(probe) if now >= probe + self.config.timeout() => HeartbeatAction::TimedOut,
            Some(_) => HeartbeatAction::Idle,
            None if now >= state.last_event() + self.config.interval() => {
                HeartbeatAction::SendProbe
            }
            None => HeartbeatAction::Idle,
        }
    }
}

//! Reconnection controller: backoff delays and the give-up decision.
//!
//! delay(n) = min(ceiling, base × multiplier^(n−1)), spread by a random
//! jitter and then clamped into `[previous delay, ceiling]` so the sequence
//! never shrinks between attempts.
//!
//! `max_attempts` counts failed connect attempts since the last success or
//! explicit `connect()`. A link that drops after a successful connection
//! schedules attempt 1 without counting a failure.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::ReconnectConfig;

// ── ReconnectionAttempt ──────────────────────────────────────────

/// Record of one scheduled retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectionAttempt {
    /// 1-based index since the last successful connection.
    pub attempt: u32,
    /// Delay the timer was armed with.
    pub delay: Duration,
    /// When the timer is due.
    pub fires_at: Instant,
    /// When the timer actually fired, once it has.
    pub fired_at: Option<Instant>,
}

/// What to do after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Arm a timer for this attempt.
    Retry(ReconnectionAttempt),
    /// Stop; the channel should enter `failed`.
    GiveUp { failures: u32 },
}

// ── ReconnectController ──────────────────────────────────────────

#[derive(Debug)]
pub struct ReconnectController {
    config: ReconnectConfig,
    failures: u32,
    history: Vec<ReconnectionAttempt>,
    last_delay: Option<Duration>,
}

impl ReconnectController {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            failures: 0,
            history: Vec::new(),
            last_delay: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Failed connect attempts since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Un-jittered delay for a 1-based attempt index.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.config.base_delay_ms as f64;
        let ceiling = self.config.max_delay_ms as f64;
        let ms = (base * self.config.multiplier.max(1.0).powi(exponent)).min(ceiling);
        Duration::from_millis(ms as u64)
    }

    /// A connect attempt failed (socket error, handshake error, timeout).
    pub fn on_connect_failed(&mut self, now: Instant) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if !self.config.enabled {
            return RetryDecision::GiveUp {
                failures: self.failures,
            };
        }
        if let Some(limit) = self.config.attempt_limit() {
            if self.failures >= limit {
                return RetryDecision::GiveUp {
                    failures: self.failures,
                };
            }
        }
        RetryDecision::Retry(self.schedule(now))
    }

    /// An established link dropped. Always schedules a retry; callers check
    /// [`enabled`](Self::enabled) first.
    pub fn on_link_lost(&mut self, now: Instant) -> ReconnectionAttempt {
        self.schedule(now)
    }

    /// Record that the pending timer fired.
    pub fn mark_fired(&mut self, now: Instant) {
        if let Some(last) = self.history.last_mut() {
            last.fired_at.get_or_insert(now);
        }
    }

    /// Move the pending timer to `now`, e.g. when the network comes back.
    /// Returns the new deadline if a timer was pending.
    pub fn pull_forward(&mut self, now: Instant) -> Option<Instant> {
        let last = self.history.last_mut()?;
        if last.fired_at.is_some() {
            return None;
        }
        if last.fires_at > now {
            last.fires_at = now;
        }
        Some(last.fires_at)
    }

    /// Forget all attempts. Called on `connected`, on explicit `connect()`,
    /// and on `disconnect()`.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.history.clear();
        self.last_delay = None;
    }

    // ── Internal ─────────────────────────────────────────────────

    fn schedule(&mut self, now: Instant) -> ReconnectionAttempt {
        let attempt = self.history.len() as u32 + 1;
        let delay = self.jittered_delay(attempt);
        self.last_delay = Some(delay);
        let record = ReconnectionAttempt {
            attempt,
            delay,
            fires_at: now + delay,
            fired_at: None,
        };
        self.history.push(record.clone());
        record
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        let ceiling = self.config.max_delay();

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let spread = if jitter > 0.0 {
            let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
            nominal.mul_f64(factor)
        } else {
            nominal
        };

        let floor = self.last_delay.unwrap_or(Duration::ZERO);
        spread.max(floor).min(ceiling)
    }
}

// ── Tests ────────────────────────────────────────────────────────

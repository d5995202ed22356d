//! Transport tuning shared by every channel session.
//!
//! All sections are `#[serde(default)]` so a config file only needs to name
//! the values it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Deadline for a single connect attempt, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Backoff between connect attempts.
    pub reconnect: ReconnectConfig,
    /// Liveness probes on an open connection.
    pub heartbeat: HeartbeatConfig,
    /// Outbound buffering while disconnected.
    pub queue: QueueConfig,
    /// Application-level splitting of large frames.
    pub chunking: ChunkConfig,
}

/// Reconnection backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect automatically after errors. When off, a failed connect
    /// goes straight to `failed` and a dropped link to `disconnected`.
    pub enabled: bool,
    /// Delay before the first reconnect attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Ceiling for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Failed connect attempts before giving up (0 = never give up).
    pub max_attempts: u32,
    /// Random spread applied to each delay, as a fraction (0.2 = ±20%).
    pub jitter: f64,
}

/// Heartbeat probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Time between probes, in milliseconds.
    pub interval_ms: u64,
    /// How long to wait for any inbound traffic after a probe.
    pub timeout_ms: u64,
}

/// Behavior when the outbound queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued entry and report it to observers.
    DropOldest,
    /// Refuse the new entry; `send()` returns `QueueFull`.
    RejectNewest,
}

/// Outbound queue bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

/// Chunked message handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Encoded frames above this size are split into `chunk` frames.
    pub max_frame_bytes: usize,
    /// Partial inbound messages older than this are discarded.
    pub reassembly_timeout_ms: u64,
    /// Upper bound on concurrently buffered partial messages.
    pub max_pending_messages: usize,
    /// Upper bound on the bytes buffered for one partial message. A
    /// message that would exceed it is discarded.
    pub max_message_bytes: usize,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            queue: QueueConfig::default(),
            chunking: ChunkConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 5,
            jitter: 0.2,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 15_000,
            timeout_ms: 10_000,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 256 * 1024,
            reassembly_timeout_ms: 60_000,
            max_pending_messages: 64,
            max_message_bytes: 16 * 1024 * 1024,
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// `None` when attempts are unlimited.
    pub fn attempt_limit(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ChunkConfig {
    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Domain-specific error types for the tether transport.
//!
//! Every fallible operation returns `Result<T, TransportError>`. Errors are
//! `Clone` so a single terminating error can be handed to every observer of
//! a channel; foreign error types are flattened to their display text.

use std::time::Duration;
use thiserror::Error;

use crate::state::ConnectionState;

/// The canonical error type for channel sessions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    // ── Connection Errors ────────────────────────────────────────
    /// DNS / TCP / WebSocket handshake failure.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connect attempt did not complete before its deadline.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The open socket reported an error or closed unexpectedly.
    #[error("socket error: {0}")]
    Socket(String),

    /// The peer closed the socket.
    #[error("socket closed by peer")]
    Closed,

    /// No traffic arrived within the heartbeat window.
    #[error("heartbeat timed out after {0:?}")]
    HeartbeatTimeout(Duration),

    /// Reconnection gave up after the configured number of failures.
    #[error("gave up after {attempts} failed connect attempts")]
    RetriesExhausted { attempts: u32 },

    /// The endpoint URL is unusable.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // ── Protocol Errors ──────────────────────────────────────────
    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A state transition was requested that the machine does not allow.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    // ── Queue Errors ─────────────────────────────────────────────
    /// The outbound queue is full and configured to reject new entries.
    #[error("outbound queue full ({capacity} entries)")]
    QueueFull { capacity: usize },

    // ── Session Errors ───────────────────────────────────────────
    /// The session task has stopped; the handle is no longer usable.
    #[error("channel closed")]
    ChannelClosed,

    /// Waiting for a condition exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Whether a retry could help. A failed connect with an unrecoverable
    /// error fails the channel at once, and a link lost to one is not
    /// reconnected.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::ConnectTimeout(_)
                | Self::Socket(_)
                | Self::Closed
                | Self::HeartbeatTimeout(_)
        )
    }
}

// ── CodecError ────────────────────────────────────────────────────

/// Errors raised at the wire codec boundary.
///
/// These are data-quality events: the offending frame is dropped and the
/// channel stays open.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// The payload was not valid JSON or did not match any frame shape.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Binary payload was not valid UTF-8.
    #[error("frame is not valid utf-8")]
    InvalidUtf8,

    /// A frame could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Chunk metadata is inconsistent (index out of range, total changed).
    #[error("invalid chunk for {message_id}: {reason}")]
    InvalidChunk {
        message_id: String,
        reason: &'static str,
    },
}

// ── Convenient From implementations ──────────────────────────────

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Malformed(e.to_string())
    }
}

impl From<std::str::Utf8Error> for CodecError {
    fn from(_: std::str::Utf8Error) -> Self {
        CodecError::InvalidUtf8
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            other => TransportError::Socket(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Socket(e.to_string())
    }
}

impl From<url::ParseError> for TransportError {
    fn from(e: url::ParseError) -> Self {
        TransportError::InvalidEndpoint(e.to_string())
    }
}

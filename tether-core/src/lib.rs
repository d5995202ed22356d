//! # tether-core
//!
//! Real-time transport for the coding-assistant mobile client.
//!
//! This crate contains:
//! - **Sessions**: `ChannelSession`, one reconnecting socket per logical channel
//! - **State**: `ConnectionState` and the validated `StateMachine`
//! - **Recovery**: `ReconnectController` (backoff) and `HeartbeatMonitor`
//! - **Queueing**: `OutboundQueue` with sequence numbers and overflow policy
//! - **Protocol**: `Frame` wire variants, `FrameCodec`, and chunked framing
//! - **Coordination**: `DualChannelCoordinator` for the chat + shell pair
//! - **Lifecycle**: `MessageLifecycleBridge` for sending/delivered/read/failed
//! - **Link**: the `Connector` seam and the `tokio-tungstenite` connector
//! - **Error**: typed `TransportError` and `CodecError` hierarchy

pub mod chunk;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod lifecycle;
pub mod link;
pub mod observer;
pub mod protocol;
pub mod queue;
pub mod reconnect;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use chunk::Reassembler;
pub use codec::{FrameCodec, InboundFrame, WireMessage};
pub use config::{
    ChunkConfig, HeartbeatConfig, OverflowPolicy, QueueConfig, ReconnectConfig, TransportConfig,
};
pub use coordinator::DualChannelCoordinator;
pub use error::{CodecError, TransportError};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor, HeartbeatState};
pub use identity::{ChannelContext, ChannelIdentity, ChannelKind};
pub use lifecycle::{FailureReason, MessageLifecycleBridge, MessageStatus, StatusChange};
pub use link::{Connector, Link, WsConnector};
pub use observer::{ChannelEvent, ChannelObserver, EventForwarder};
pub use protocol::Frame;
pub use queue::{OutboundEnvelope, OutboundQueue, SendTicket};
pub use reconnect::{ReconnectController, ReconnectionAttempt, RetryDecision};
pub use session::ChannelSession;
pub use state::{ConnectionState, StateMachine, Transition};

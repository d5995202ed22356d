//! Per-message delivery status for the chat channel.
//!
//! ```text
//! sending ──reply──► delivered ──receipt──► read
//!    │
//!    └──channel failed / queue drop / ack timeout──► failed
//! ```
//!
//! Each outbound `claude-command` gets a client-assigned `messageId`. The
//! backend echoes it as `replyToMessageId` on the reply, and later sends a
//! `read-receipt` carrying it.
//!
//! Statuses only move forward along the arrows. A receipt for a message
//! still in `sending` reports `delivered` first. A failed message is taken
//! out of the outbound queue and forgotten, so later replies and receipts
//! for it are ignored. Only the ids of the last [`DELIVERED_HISTORY`]
//! delivered messages are kept, for correlating their receipts; a read
//! message is forgotten too.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::InboundFrame;
use crate::error::TransportError;
use crate::identity::{ChannelContext, ChannelKind};
use crate::observer::ChannelObserver;
use crate::protocol::Frame;
use crate::queue::{OutboundEnvelope, SendTicket, SharedQueue, lock};
use crate::reconnect::ReconnectionAttempt;
use crate::session::ChannelSession;
use crate::state::{ConnectionState, Transition};

type StatusCallback = Box<dyn Fn(&StatusChange) + Send + Sync + 'static>;

/// Delivered messages remembered while their read receipt is outstanding.
pub const DELIVERED_HISTORY: usize = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Sending,
    Delivered,
    Read,
    Failed,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sending => "sending",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a message ended up `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// `send()` refused the message, e.g. the queue was full.
    Rejected,
    ChannelFailed,
    QueueDropped,
    AckTimeout,
}

/// One status update, as handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub message_id: String,
    pub status: MessageStatus,
    pub reason: Option<FailureReason>,
}

// ── Tracking ─────────────────────────────────────────────────────

#[derive(Debug)]
struct TrackedMessage {
    ticket: SendTicket,
    sent_at: Instant,
}

#[derive(Debug, Default)]
struct Tracking {
    /// Messages in `sending`.
    sending: HashMap<String, TrackedMessage>,
    /// Messages in `delivered`, awaiting a receipt.
    delivered: HashSet<String>,
    /// Insertion order of `delivered`, oldest first.
    delivered_order: VecDeque<String>,
}

impl Tracking {
    fn mark_delivered(&mut self, message_id: &str) {
        if self.delivered.insert(message_id.to_owned()) {
            self.delivered_order.push_back(message_id.to_owned());
        }
        while self.delivered_order.len() > DELIVERED_HISTORY {
            if let Some(oldest) = self.delivered_order.pop_front() {
                self.delivered.remove(&oldest);
            }
        }
    }

    fn forget_delivered(&mut self, message_id: &str) -> bool {
        let known = self.delivered.remove(message_id);
        if known {
            self.delivered_order.retain(|id| id != message_id);
        }
        known
    }

    fn status(&self, message_id: &str) -> Option<MessageStatus> {
        if self.sending.contains_key(message_id) {
            Some(MessageStatus::Sending)
        } else if self.delivered.contains(message_id) {
            Some(MessageStatus::Delivered)
        } else {
            None
        }
    }

    /// Statuses to report for a reply (`Delivered`) or receipt (`Read`).
    fn advance(&mut self, message_id: &str, target: MessageStatus) -> Vec<MessageStatus> {
        match (self.status(message_id), target) {
            (Some(MessageStatus::Sending), MessageStatus::Delivered) => {
                self.sending.remove(message_id);
                self.mark_delivered(message_id);
                vec![MessageStatus::Delivered]
            }
            (Some(MessageStatus::Sending), MessageStatus::Read) => {
                self.sending.remove(message_id);
                vec![MessageStatus::Delivered, MessageStatus::Read]
            }
            (Some(MessageStatus::Delivered), MessageStatus::Read) => {
                self.forget_delivered(message_id);
                vec![MessageStatus::Read]
            }
            _ => Vec::new(),
        }
    }
}

struct Inner {
    tracking: Mutex<Tracking>,
    callbacks: RwLock<Vec<StatusCallback>>,
    ack_timeout: Option<Duration>,
    queue: SharedQueue,
}

impl Inner {
    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, changes: &[StatusChange]) {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        for change in changes {
            debug!(message_id = %change.message_id, status = %change.status, "message status");
            for cb in callbacks.iter() {
                cb(change);
            }
        }
    }

    fn resolve(&self, message_id: &str, target: MessageStatus) {
        let steps = self.tracking().advance(message_id, target);
        if steps.is_empty() {
            debug!(message_id, status = %target, "status update for unknown or finished message ignored");
            return;
        }
        let changes: Vec<StatusChange> = steps
            .into_iter()
            .map(|status| StatusChange {
                message_id: message_id.to_owned(),
                status,
                reason: None,
            })
            .collect();
        self.emit(&changes);
    }

    /// Fail every `sending` message matching `pred` and take its frames
    /// out of the outbound queue.
    fn fail_where(&self, reason: FailureReason, pred: impl Fn(&TrackedMessage) -> bool) -> Vec<String> {
        let failed: Vec<(String, SendTicket)> = {
            let mut tracking = self.tracking();
            let ids: Vec<String> = tracking
                .sending
                .iter()
                .filter(|(_, m)| pred(m))
                .map(|(id, _)| id.clone())
                .collect();
            let mut failed = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(message) = tracking.sending.remove(&id) {
                    failed.push((id, message.ticket));
                }
            }
            failed
        };

        let mut queue = lock(&self.queue);
        let withdrawn: usize = failed.iter().map(|(_, ticket)| queue.remove_ticket(ticket)).sum();
        drop(queue);
        if withdrawn > 0 {
            debug!(frames = withdrawn, "failed messages withdrawn from the queue");
        }

        let changes: Vec<StatusChange> = failed
            .iter()
            .map(|(message_id, _)| StatusChange {
                message_id: message_id.clone(),
                status: MessageStatus::Failed,
                reason: Some(reason.clone()),
            })
            .collect();
        self.emit(&changes);
        failed.into_iter().map(|(id, _)| id).collect()
    }
}

impl ChannelObserver for Inner {
    fn on_state_changed(&self, _kind: ChannelKind, transition: Transition) {
        if transition.to == ConnectionState::Failed {
            let failed = self.fail_where(FailureReason::ChannelFailed, |_| true);
            if !failed.is_empty() {
                warn!(count = failed.len(), "channel failed with messages in flight");
            }
        }
    }

    fn on_connected(&self, _kind: ChannelKind) {}

    fn on_disconnected(&self, _kind: ChannelKind, _error: Option<&TransportError>) {}

    fn on_frame(&self, _kind: ChannelKind, frame: &InboundFrame) {
        match &frame.frame {
            Frame::Message {
                reply_to_message_id: Some(id),
                ..
            } => self.resolve(id, MessageStatus::Delivered),
            Frame::ReadReceipt { message_id } => self.resolve(message_id, MessageStatus::Read),
            _ => {}
        }
    }

    fn on_reconnect_attempt(&self, _kind: ChannelKind, _attempt: &ReconnectionAttempt) {}

    fn on_dropped(&self, _kind: ChannelKind, envelope: &OutboundEnvelope) {
        self.fail_where(FailureReason::QueueDropped, |m| m.ticket == envelope.ticket);
    }
}

// ── MessageLifecycleBridge ───────────────────────────────────────

/// Sends chat messages and reports their delivery status.
pub struct MessageLifecycleBridge {
    session: ChannelSession,
    inner: Arc<Inner>,
}

impl MessageLifecycleBridge {
    /// Attach to a chat session. Messages never expire.
    pub fn attach(session: ChannelSession) -> Self {
        Self::build(session, None)
    }

    /// Attach with an acknowledgment deadline enforced by
    /// [`expire`](Self::expire).
    pub fn with_ack_timeout(session: ChannelSession, ack_timeout: Duration) -> Self {
        Self::build(session, Some(ack_timeout))
    }

    fn build(session: ChannelSession, ack_timeout: Option<Duration>) -> Self {
        let inner = Arc::new(Inner {
            tracking: Mutex::new(Tracking::default()),
            callbacks: RwLock::new(Vec::new()),
            ack_timeout,
            queue: session.shared_queue(),
        });
        session.add_observer(inner.clone());
        Self { session, inner }
    }

    pub fn session(&self) -> &ChannelSession {
        &self.session
    }

    /// Register a status callback. Callbacks run on the session task for
    /// transport-driven changes and on the caller's task for `send_message`
    /// and `expire`.
    pub fn on_status_changed<F>(&self, f: F)
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(f));
    }

    /// Send a chat command. Returns the assigned message id.
    pub fn send_message(&self, command: impl Into<String>) -> Result<String, TransportError> {
        let message_id = Uuid::new_v4().to_string();
        let (project_path, session_id) = match self.session.identity().context() {
            ChannelContext::Chat {
                project_path,
                session_id,
            } => (Some(project_path.clone()), session_id.clone()),
            ChannelContext::Shell { .. } => (None, None),
        };
        let frame = Frame::ClaudeCommand {
            command: command.into(),
            project_path,
            session_id,
            message_id: Some(message_id.clone()),
        };

        self.inner.emit(&[StatusChange {
            message_id: message_id.clone(),
            status: MessageStatus::Sending,
            reason: None,
        }]);

        // Held across the enqueue so a drop report cannot race the insert.
        let mut tracking = self.inner.tracking();
        match self.session.send(&frame) {
            Ok(ticket) => {
                tracking.sending.insert(
                    message_id.clone(),
                    TrackedMessage {
                        ticket,
                        sent_at: Instant::now(),
                    },
                );
            }
            Err(e) => {
                drop(tracking);
                self.inner.emit(&[StatusChange {
                    message_id,
                    status: MessageStatus::Failed,
                    reason: Some(FailureReason::Rejected),
                }]);
                return Err(e);
            }
        }
        Ok(message_id)
    }

    /// Status of a message still in `sending`, or delivered and awaiting
    /// its receipt. `None` once read, failed, or unknown.
    pub fn status(&self, message_id: &str) -> Option<MessageStatus> {
        self.inner.tracking().status(message_id)
    }

    /// Messages still in `sending`.
    pub fn pending(&self) -> usize {
        self.inner.tracking().sending.len()
    }

    /// Fail every message older than the acknowledgment timeout. Returns
    /// their ids.
    pub fn expire(&self) -> Vec<String> {
        let Some(limit) = self.inner.ack_timeout else {
            return Vec::new();
        };
        let now = Instant::now();
        let expired = self.inner.fail_where(FailureReason::AckTimeout, |m| {
            now.saturating_duration_since(m.sent_at) >= limit
        });
        if !expired.is_empty() {
            warn!(count = expired.len(), "messages not acknowledged in time");
        }
        expired
    }
}

impl fmt::Debug for MessageLifecycleBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLifecycleBridge")
            .field("session", &self.session)
            .field("pending", &self.pending())
            .finish()
    }
}

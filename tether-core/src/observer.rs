//! Session event observers.
//!
//! Observers are called synchronously on the session task, in registration
//! order, after the session has updated its own state. They must not block.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::codec::InboundFrame;
use crate::error::TransportError;
use crate::identity::ChannelKind;
use crate::queue::OutboundEnvelope;
use crate::reconnect::ReconnectionAttempt;
use crate::state::Transition;

/// Receives a channel's lifecycle and traffic events.
pub trait ChannelObserver: Send + Sync {
    /// Every state change, including ones also reported below.
    fn on_state_changed(&self, kind: ChannelKind, transition: Transition);

    /// The socket opened and the `init` frame is next on the wire.
    fn on_connected(&self, kind: ChannelKind);

    /// The channel left `connected`, or gave up. `error` is `None` for an
    /// explicit `disconnect()`.
    fn on_disconnected(&self, kind: ChannelKind, error: Option<&TransportError>);

    /// A decoded inbound frame, after chunk reassembly.
    fn on_frame(&self, kind: ChannelKind, frame: &InboundFrame);

    /// A reconnect timer was armed.
    fn on_reconnect_attempt(&self, kind: ChannelKind, attempt: &ReconnectionAttempt);

    /// A `pong` arrived, echoing the timestamp of our `ping` if the peer
    /// kept it.
    fn on_pong(&self, _kind: ChannelKind, _timestamp: Option<u64>) {}

    /// The queue evicted an entry to make room.
    fn on_dropped(&self, _kind: ChannelKind, _envelope: &OutboundEnvelope) {}
}

// ── ObserverList ─────────────────────────────────────────────────

/// Ordered fan-out owned by the session task.
pub(crate) struct ObserverList {
    kind: ChannelKind,
    observers: Vec<Arc<dyn ChannelObserver>>,
}

impl ObserverList {
    pub(crate) fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            observers: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, observer: Arc<dyn ChannelObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    fn each(&self, f: impl Fn(&dyn ChannelObserver, ChannelKind)) {
        for observer in &self.observers {
            f(observer.as_ref(), self.kind);
        }
    }

    pub(crate) fn state_changed(&self, transition: Transition) {
        self.each(|o, k| o.on_state_changed(k, transition));
    }

    pub(crate) fn connected(&self) {
        self.each(|o, k| o.on_connected(k));
    }

    pub(crate) fn disconnected(&self, error: Option<&TransportError>) {
        self.each(|o, k| o.on_disconnected(k, error));
    }

    pub(crate) fn frame(&self, frame: &InboundFrame) {
        self.each(|o, k| o.on_frame(k, frame));
    }

    pub(crate) fn reconnect_attempt(&self, attempt: &ReconnectionAttempt) {
        self.each(|o, k| o.on_reconnect_attempt(k, attempt));
    }

    pub(crate) fn pong(&self, timestamp: Option<u64>) {
        self.each(|o, k| o.on_pong(k, timestamp));
    }

    pub(crate) fn dropped(&self, envelope: &OutboundEnvelope) {
        self.each(|o, k| o.on_dropped(k, envelope));
    }
}

// ── ChannelEvent ─────────────────────────────────────────────────

/// Owned copy of one observer callback, for consumers that prefer a
/// channel to a trait object.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    StateChanged {
        kind: ChannelKind,
        transition: Transition,
    },
    Connected(ChannelKind),
    Disconnected {
        kind: ChannelKind,
        error: Option<TransportError>,
    },
    Frame {
        kind: ChannelKind,
        frame: InboundFrame,
    },
    ReconnectAttempt {
        kind: ChannelKind,
        attempt: ReconnectionAttempt,
    },
    Pong {
        kind: ChannelKind,
        timestamp: Option<u64>,
    },
    Dropped {
        kind: ChannelKind,
        seq: u64,
    },
}

/// Observer that forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl EventForwarder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ChannelEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl ChannelObserver for EventForwarder {
    fn on_state_changed(&self, kind: ChannelKind, transition: Transition) {
        self.forward(ChannelEvent::StateChanged { kind, transition });
    }

    fn on_connected(&self, kind: ChannelKind) {
        self.forward(ChannelEvent::Connected(kind));
    }

    fn on_disconnected(&self, kind: ChannelKind, error: Option<&TransportError>) {
        self.forward(ChannelEvent::Disconnected {
            kind,
            error: error.cloned(),
        });
    }

    fn on_frame(&self, kind: ChannelKind, frame: &InboundFrame) {
        self.forward(ChannelEvent::Frame {
            kind,
            frame: frame.clone(),
        });
    }

    fn on_reconnect_attempt(&self, kind: ChannelKind, attempt: &ReconnectionAttempt) {
        self.forward(ChannelEvent::ReconnectAttempt {
            kind,
            attempt: attempt.clone(),
        });
    }

    fn on_pong(&self, kind: ChannelKind, timestamp: Option<u64>) {
        self.forward(ChannelEvent::Pong { kind, timestamp });
    }

    fn on_dropped(&self, kind: ChannelKind, envelope: &OutboundEnvelope) {
        self.forward(ChannelEvent::Dropped {
            kind,
            seq: envelope.seq,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ChannelObserver for Recorder {
        fn on_state_changed(&self, kind: ChannelKind, t: Transition) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{kind}:{}->{}", self.name, t.from, t.to));
        }
        fn on_connected(&self, _: ChannelKind) {}
        fn on_disconnected(&self, _: ChannelKind, _: Option<&TransportError>) {}
        fn on_frame(&self, _: ChannelKind, _: &InboundFrame) {}
        fn on_reconnect_attempt(&self, _: ChannelKind, _: &ReconnectionAttempt) {}
    }

    #[test]
    fn observers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = ObserverList::new(ChannelKind::Shell);
        for name in ["first", "second"] {
            list.push(Arc::new(Recorder {
                name,
                log: log.clone(),
            }));
        }
        assert_eq!(list.len(), 2);
        list.state_changed(Transition {
            from: ConnectionState::Disconnected,
            to: ConnectionState::Connecting,
        });
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:shell:disconnected->connecting",
                "second:shell:disconnected->connecting"
            ]
        );
    }

    #[test]
    fn optional_callbacks_default_to_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut list = ObserverList::new(ChannelKind::Chat);
        list.push(Arc::new(Recorder {
            name: "r",
            log: log.clone(),
        }));
        list.pong(Some(1));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forwarder_copies_events() {
        let (fwd, mut rx) = EventForwarder::new();
        fwd.on_connected(ChannelKind::Chat);
        fwd.on_disconnected(ChannelKind::Chat, Some(&TransportError::Closed));

        assert_eq!(rx.recv().await, Some(ChannelEvent::Connected(ChannelKind::Chat)));
        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::Disconnected {
                kind: ChannelKind::Chat,
                error: Some(TransportError::Closed),
            })
        );
    }
}

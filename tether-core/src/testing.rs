//! In-memory connector with fault injection, for session tests.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::{Notify, mpsc};

use crate::codec::{FrameCodec, WireMessage};
use crate::error::TransportError;
use crate::identity::ChannelIdentity;
use crate::link::{Connector, Link, LinkSink};
use crate::protocol::Frame;

struct Shared {
    connects: AtomicU32,
    refuse: Mutex<(u32, TransportError)>,
    hold: AtomicBool,
    stall_writes: AtomicBool,
    release: Notify,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

/// Client side, handed to the session.
pub(crate) struct MockConnector {
    shared: Arc<Shared>,
}

/// Test side: controls faults and receives accepted links.
pub(crate) struct MockRemote {
    shared: Arc<Shared>,
    accepted: mpsc::UnboundedReceiver<ServerEnd>,
}

pub(crate) fn mock() -> (MockConnector, MockRemote) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        connects: AtomicU32::new(0),
        refuse: Mutex::new((0, TransportError::Connect("refused by mock".into()))),
        hold: AtomicBool::new(false),
        stall_writes: AtomicBool::new(false),
        release: Notify::new(),
        accepted: tx,
    });
    (
        MockConnector {
            shared: shared.clone(),
        },
        MockRemote {
            shared,
            accepted: rx,
        },
    )
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _identity: &ChannelIdentity) -> Result<Link, TransportError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if self.shared.hold.load(Ordering::SeqCst) {
            self.shared.release.notified().await;
        }
        {
            let mut refuse = self.shared.refuse.lock().unwrap();
            if refuse.0 > 0 {
                refuse.0 -= 1;
                return Err(refuse.1.clone());
            }
        }

        let (client_tx, server_rx) = fmpsc::unbounded::<WireMessage>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<WireMessage, TransportError>>();
        let _ = self.shared.accepted.send(ServerEnd {
            tx: server_tx,
            rx: server_rx,
        });
        let sink: LinkSink = if self.shared.stall_writes.load(Ordering::SeqCst) {
            Box::pin(StalledSink)
        } else {
            Box::pin(client_tx.sink_map_err(|_| TransportError::Closed))
        };
        Ok(Link::new(sink, Box::pin(client_rx)))
    }
}

impl MockRemote {
    /// Refuse the next `n` connect attempts.
    pub(crate) fn refuse_next(&self, n: u32) {
        self.refuse_next_with(n, TransportError::Connect("refused by mock".into()));
    }

    /// Refuse the next `n` connect attempts with `error`.
    pub(crate) fn refuse_next_with(&self, n: u32, error: TransportError) {
        *self.shared.refuse.lock().unwrap() = (n, error);
    }

    /// While set, new links get a sink that never accepts a write, like a
    /// socket whose peer stopped reading.
    pub(crate) fn stall_writes(&self, stall: bool) {
        self.shared.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// While set, connect attempts wait for [`release`](Self::release).
    pub(crate) fn hold_connects(&self, hold: bool) {
        self.shared.hold.store(hold, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.shared.release.notify_waiters();
    }

    pub(crate) fn connects(&self) -> u32 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub(crate) async fn accept(&mut self) -> ServerEnd {
        self.accepted.recv().await.expect("connector dropped")
    }

    pub(crate) fn try_accept(&mut self) -> Option<ServerEnd> {
        self.accepted.try_recv().ok()
    }
}

/// Server half of one in-memory link. Dropping it closes the link.
pub(crate) struct ServerEnd {
    tx: fmpsc::UnboundedSender<Result<WireMessage, TransportError>>,
    rx: fmpsc::UnboundedReceiver<WireMessage>,
}

impl ServerEnd {
    pub(crate) fn send_frame(&self, frame: &Frame) {
        let msg = FrameCodec.encode_frame(frame).unwrap();
        self.tx.unbounded_send(Ok(msg)).unwrap();
    }

    pub(crate) fn send_raw(&self, text: &str) {
        self.tx
            .unbounded_send(Ok(WireMessage::Text(text.to_owned())))
            .unwrap();
    }

    /// Stop accepting client writes; the next client send fails.
    pub(crate) fn close_inbound(&mut self) {
        self.rx.close();
    }

    pub(crate) async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.next().await
    }

    pub(crate) async fn recv_frame(&mut self) -> Frame {
        let msg = self.recv().await.expect("link closed");
        FrameCodec.decode_message(&msg).unwrap()
    }
}

/// Sink that is never ready.
struct StalledSink;

impl Sink<WireMessage> for StalledSink {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: WireMessage) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }
}

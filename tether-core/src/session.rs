//! One logical channel: a reconnecting socket with an outbound queue.
//!
//! A [`ChannelSession`] is a cheap handle onto a session task. The task is
//! the single owner of the state machine, backoff controller, heartbeat,
//! chunk reassembler and socket sink; handles reach it over a command
//! channel. The outbound queue is shared so that `send()` can assign its
//! sequence number synchronously, in call order.
//!
//! ```text
//!  handle ──Command──► session task ──Outgoing──► writer task ──► Link sink
//!                         ▲   │                        │
//!      reader task ───────┤   └──callbacks──► observers │
//!                         └────────── Written / Lost ◄──┘
//!      (tagged by generation)
//! ```
//!
//! The session task never awaits the socket. Writes go through a writer
//! task that reports each completed queue entry back, so commands, timers
//! and the heartbeat deadline stay live while a write is stuck on a peer
//! that stopped reading. Only one queue entry is handed to the writer at a
//! time, and it is popped only after the writer reports it written.
//!
//! Every connect attempt and every open link carries a generation number.
//! `disconnect()` and link teardown bump it, so a late result from an
//! abandoned attempt, reader or writer is ignored.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt, future};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunk::{self, Reassembler};
use crate::codec::{FrameCodec, InboundFrame, WireMessage};
use crate::config::{ChunkConfig, TransportConfig};
use crate::error::TransportError;
use crate::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::identity::{ChannelIdentity, ChannelKind};
use crate::link::{Connector, Link, LinkSink, LinkStream, WsConnector};
use crate::observer::{ChannelEvent, ChannelObserver, EventForwarder, ObserverList};
use crate::protocol::Frame;
use crate::queue::{OutboundEnvelope, OutboundQueue, SendTicket, SharedQueue, lock};
use crate::reconnect::{ReconnectController, ReconnectionAttempt, RetryDecision};
use crate::state::{ConnectionState, StateMachine, Transition};

/// How long an explicit disconnect waits for the close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Writer channel depth. Control frames never take the last slot, which
/// stays free for the single tracked frame.
const WRITER_BUFFER: usize = 16;

// ── Commands ─────────────────────────────────────────────────────

enum Command {
    Connect(oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    /// The queue gained entries.
    Wake,
    /// Entries evicted by `send()` under drop-oldest.
    Dropped(Vec<OutboundEnvelope>),
    AddObserver(Arc<dyn ChannelObserver>),
    RetryNow,
}

enum LinkEvent {
    Opened(Link),
    ConnectFailed(TransportError),
    Inbound(WireMessage),
    /// The writer put a tracked frame on the socket: `init` for `None`,
    /// otherwise the queue entry with that sequence number.
    Written(Option<u64>),
    Lost(TransportError),
}

/// Work for the writer task.
enum Outgoing {
    /// Completion is reported back as [`LinkEvent::Written`].
    Tracked {
        seq: Option<u64>,
        message: WireMessage,
    },
    /// Ping or pong; fire and forget.
    Control(WireMessage),
    /// Run the close handshake, then stop.
    Close,
}

/// Session-side handle of a link's writer task.
struct Writer {
    tx: mpsc::Sender<Outgoing>,
    cancel: CancellationToken,
}

impl Writer {
    /// Drop the socket now, abandoning any write in progress.
    fn abort(self) {
        self.cancel.cancel();
    }

    /// Close after the frames already handed over. A writer still stuck
    /// after [`CLOSE_GRACE`] is aborted.
    fn close(self) {
        if self.tx.try_send(Outgoing::Close).is_err() {
            self.cancel.cancel();
            return;
        }
        let cancel = self.cancel;
        tokio::spawn(async move {
            sleep(CLOSE_GRACE).await;
            cancel.cancel();
        });
    }
}

// ── ChannelSession ───────────────────────────────────────────────

/// Handle onto one channel session. Clones share the same session; the
/// session task stops once every handle is dropped.
#[derive(Clone)]
pub struct ChannelSession {
    identity: Arc<ChannelIdentity>,
    commands: mpsc::UnboundedSender<Command>,
    queue: SharedQueue,
    state: watch::Receiver<ConnectionState>,
    codec: FrameCodec,
    chunking: ChunkConfig,
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("kind", &self.identity.kind())
            .field("endpoint", &self.identity.endpoint().as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl ChannelSession {
    /// Session over the WebSocket connector. Must be called inside a Tokio
    /// runtime.
    pub fn new(identity: ChannelIdentity, config: TransportConfig) -> Self {
        Self::with_connector(identity, config, WsConnector)
    }

    pub fn with_connector<C: Connector>(
        identity: ChannelIdentity,
        config: TransportConfig,
        connector: C,
    ) -> Self {
        let identity = Arc::new(identity);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(OutboundQueue::new(config.queue.clone())));

        let task = SessionTask {
            kind: identity.kind(),
            identity: identity.clone(),
            connector: Arc::new(connector),
            codec: FrameCodec,
            machine: StateMachine::new(),
            state_tx,
            reconnect: ReconnectController::new(config.reconnect.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat.clone()),
            reassembler: Reassembler::new(config.chunking.clone()),
            queue: queue.clone(),
            observers: ObserverList::new(identity.kind()),
            commands: cmd_rx,
            link_tx,
            link_rx,
            generation: 0,
            attempt: None,
            writer: None,
            reader: None,
            retry_at: None,
            init_pending: false,
            in_flight: false,
            connect_timeout: config.connect_timeout(),
        };
        tokio::spawn(task.run());

        Self {
            identity,
            commands: cmd_tx,
            queue,
            state: state_rx,
            codec: FrameCodec,
            chunking: config.chunking,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.identity.kind()
    }

    pub fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that sees every published state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Start connecting. No-op while connecting, connected or waiting to
    /// reconnect. From `failed` this starts over with a fresh attempt count.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.request(Command::Connect).await
    }

    /// Go to `disconnected` now: cancel timers, the in-flight attempt and
    /// the open link. Queued frames are kept.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.request(Command::Disconnect).await
    }

    /// Encode, chunk if oversized, and enqueue. Never waits for the socket.
    pub fn send(&self, frame: &Frame) -> Result<SendTicket, TransportError> {
        if self.commands.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        let message = self.codec.encode_frame(frame)?;
        let payloads = match message {
            WireMessage::Text(text) if text.len() > self.chunking.max_frame_bytes => {
                let id = frame
                    .message_id()
                    .map(str::to_owned)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                chunk::split(&text, &id, self.chunking.max_frame_bytes)
                    .iter()
                    .map(|part| self.codec.encode_frame(part))
                    .collect::<Result<Vec<_>, _>>()?
            }
            other => vec![other],
        };

        let (ticket, dropped) = lock(&self.queue).push_all(payloads, Instant::now())?;
        if !dropped.is_empty() {
            let _ = self.commands.send(Command::Dropped(dropped));
        }
        self.commands
            .send(Command::Wake)
            .map_err(|_| TransportError::ChannelClosed)?;
        Ok(ticket)
    }

    /// Number of frames waiting for the socket.
    pub fn queued(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Sequence numbers waiting for the socket, oldest first.
    pub fn queued_seqs(&self) -> Vec<u64> {
        lock(&self.queue).seqs()
    }

    /// Discard every queued frame. Returns how many were removed.
    pub fn clear_queue(&self) -> usize {
        lock(&self.queue).clear()
    }

    /// Discard the frames of one send that have not gone out yet. Returns
    /// how many were removed.
    pub fn discard(&self, ticket: &SendTicket) -> usize {
        lock(&self.queue).remove_ticket(ticket)
    }

    /// The queue itself, for collaborators that must not keep the session
    /// task alive.
    pub(crate) fn shared_queue(&self) -> SharedQueue {
        self.queue.clone()
    }

    /// Register an observer. Observers run in registration order.
    pub fn add_observer(&self, observer: Arc<dyn ChannelObserver>) {
        let _ = self.commands.send(Command::AddObserver(observer));
    }

    /// Observer events as a channel.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (forwarder, rx) = EventForwarder::new();
        self.add_observer(Arc::new(forwarder));
        rx
    }

    /// Fire a pending reconnect timer now. Used when the network comes
    /// back; the attempt count is unchanged.
    pub fn retry_now(&self) {
        let _ = self.commands.send(Command::RetryNow);
    }

    /// Wait until the channel is in `target`.
    pub async fn wait_for_state(
        &self,
        target: ConnectionState,
        within: Duration,
    ) -> Result<(), TransportError> {
        let mut rx = self.state.clone();
        timeout(within, async move {
            rx.wait_for(|state| *state == target).await.map(|_| ())
        })
        .await
        .map_err(|_| TransportError::Timeout(within))?
        .map_err(|_| TransportError::ChannelClosed)
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<()>) -> Command,
    ) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| TransportError::ChannelClosed)?;
        rx.await.map_err(|_| TransportError::ChannelClosed)
    }
}

// ── SessionTask ──────────────────────────────────────────────────

struct SessionTask {
    kind: ChannelKind,
    identity: Arc<ChannelIdentity>,
    connector: Arc<dyn Connector>,
    codec: FrameCodec,
    machine: StateMachine,
    state_tx: watch::Sender<ConnectionState>,
    reconnect: ReconnectController,
    heartbeat: HeartbeatMonitor,
    reassembler: Reassembler,
    queue: SharedQueue,
    observers: ObserverList,
    commands: mpsc::UnboundedReceiver<Command>,
    link_tx: mpsc::UnboundedSender<(u64, LinkEvent)>,
    link_rx: mpsc::UnboundedReceiver<(u64, LinkEvent)>,
    generation: u64,
    attempt: Option<JoinHandle<()>>,
    writer: Option<Writer>,
    reader: Option<CancellationToken>,
    retry_at: Option<Instant>,
    /// The `init` frame is owed on the current link.
    init_pending: bool,
    /// A tracked frame is with the writer and not yet reported written.
    in_flight: bool,
    connect_timeout: Duration,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

impl SessionTask {
    async fn run(mut self) {
        debug!(channel = %self.kind, endpoint = %self.identity.endpoint(), "session started");
        loop {
            let drain_ready = self.drain_ready();
            let retry_at = self.retry_at;
            let heartbeat_at = self.heartbeat.next_deadline();

            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some((generation, event)) = self.link_rx.recv() => {
                    self.handle_link_event(generation, event);
                }
                _ = sleep_until_opt(retry_at) => self.retry_fired(),
                _ = sleep_until_opt(heartbeat_at) => self.heartbeat_due(),
                _ = future::ready(()), if drain_ready => self.drain_one(),
            }
        }
        self.shutdown();
        debug!(channel = %self.kind, "session stopped");
    }

    // ── State publication ────────────────────────────────────────

    fn publish(&mut self, transition: Transition) {
        self.state_tx.send_replace(transition.to);
        info!(channel = %self.kind, from = %transition.from, to = %transition.to, "state changed");
        self.observers.state_changed(transition);
    }

    fn apply(&mut self, result: Result<Transition, TransportError>) -> bool {
        match result {
            Ok(transition) => {
                self.publish(transition);
                true
            }
            Err(e) => {
                warn!(channel = %self.kind, error = %e, "transition refused");
                false
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(ack) => {
                self.connect();
                let _ = ack.send(());
            }
            Command::Disconnect(ack) => {
                self.disconnect();
                let _ = ack.send(());
            }
            Command::Wake => {}
            Command::Dropped(entries) => {
                for envelope in &entries {
                    warn!(channel = %self.kind, seq = envelope.seq, "queue full; dropped oldest entry");
                    self.observers.dropped(envelope);
                }
            }
            Command::AddObserver(observer) => {
                self.observers.push(observer);
                debug!(channel = %self.kind, observers = self.observers.len(), "observer added");
            }
            Command::RetryNow => {
                if self.machine.state() == ConnectionState::Reconnecting {
                    if let Some(at) = self.reconnect.pull_forward(Instant::now()) {
                        debug!(channel = %self.kind, "retrying now");
                        self.retry_at = Some(at);
                    }
                }
            }
        }
    }

    fn connect(&mut self) {
        match self.machine.begin_connect() {
            Ok(Some(transition)) => {
                self.reconnect.reset();
                self.publish(transition);
                self.start_attempt();
            }
            Ok(None) => {
                debug!(channel = %self.kind, state = %self.machine.state(), "connect ignored");
            }
            Err(e) => warn!(channel = %self.kind, error = %e, "connect refused"),
        }
    }

    fn disconnect(&mut self) {
        let was_connected = self.machine.state().is_connected();
        self.abort_attempt();
        self.retry_at = None;
        self.reconnect.reset();
        if let Some(writer) = self.teardown_link() {
            writer.close();
        }
        if let Some(transition) = self.machine.disconnect() {
            self.publish(transition);
            if was_connected {
                self.observers.disconnected(None);
            }
        }
    }

    // ── Connect attempts ─────────────────────────────────────────

    fn start_attempt(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let connector = self.connector.clone();
        let identity = self.identity.clone();
        let deadline = self.connect_timeout;
        let tx = self.link_tx.clone();

        debug!(channel = %self.kind, generation, "connect attempt started");
        self.attempt = Some(tokio::spawn(async move {
            let event = match timeout(deadline, connector.connect(&identity)).await {
                Ok(Ok(link)) => LinkEvent::Opened(link),
                Ok(Err(e)) => LinkEvent::ConnectFailed(e),
                Err(_) => LinkEvent::ConnectFailed(TransportError::ConnectTimeout(deadline)),
            };
            let _ = tx.send((generation, event));
        }));
    }

    fn abort_attempt(&mut self) {
        if let Some(handle) = self.attempt.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    fn retry_fired(&mut self) {
        self.retry_at = None;
        self.reconnect.mark_fired(Instant::now());
        let result = self.machine.begin_retry();
        if self.apply(result) {
            self.start_attempt();
        }
    }

    fn arm(&mut self, attempt: ReconnectionAttempt) {
        info!(
            channel = %self.kind,
            attempt = attempt.attempt,
            delay_ms = attempt.delay.as_millis() as u64,
            "reconnect scheduled"
        );
        self.retry_at = Some(attempt.fires_at);
        self.observers.reconnect_attempt(&attempt);
    }

    // ── Link events ──────────────────────────────────────────────

    fn handle_link_event(&mut self, generation: u64, event: LinkEvent) {
        if generation != self.generation {
            debug!(channel = %self.kind, generation, current = self.generation, "stale link event ignored");
            return;
        }
        match event {
            LinkEvent::Opened(link) => self.opened(link),
            LinkEvent::ConnectFailed(e) => self.connect_failed(e),
            LinkEvent::Inbound(message) => self.inbound(message),
            LinkEvent::Written(seq) => self.written(seq),
            LinkEvent::Lost(e) => self.link_lost(e),
        }
    }

    fn opened(&mut self, link: Link) {
        self.attempt = None;
        let result = self.machine.opened();
        if !self.apply(result) {
            return;
        }
        let now = Instant::now();
        self.reconnect.reset();
        self.writer = Some(self.spawn_writer(link.sink));
        self.reader = Some(self.spawn_reader(link.stream));
        self.heartbeat.start(now);
        self.init_pending = true;
        self.in_flight = false;
        self.observers.connected();
    }

    fn connect_failed(&mut self, error: TransportError) {
        self.attempt = None;
        warn!(channel = %self.kind, error = %error, "connect attempt failed");
        let decision = if error.is_recoverable() {
            self.reconnect.on_connect_failed(Instant::now())
        } else {
            RetryDecision::GiveUp {
                failures: self.reconnect.failures() + 1,
            }
        };
        match decision {
            RetryDecision::Retry(attempt) => {
                let result = self.machine.schedule_retry();
                if self.apply(result) {
                    self.arm(attempt);
                }
            }
            RetryDecision::GiveUp { failures } => {
                let error = if self.reconnect.enabled() && error.is_recoverable() {
                    TransportError::RetriesExhausted { attempts: failures }
                } else {
                    error
                };
                let result = self.machine.give_up();
                if self.apply(result) {
                    error!(channel = %self.kind, error = %error, "channel failed");
                    self.observers.disconnected(Some(&error));
                }
            }
        }
    }

    fn link_lost(&mut self, error: TransportError) {
        if !self.machine.state().is_connected() {
            return;
        }
        if let Some(writer) = self.teardown_link() {
            writer.abort();
        }
        warn!(channel = %self.kind, error = %error, queued = lock(&self.queue).len(), "link lost");

        if self.reconnect.enabled() && error.is_recoverable() {
            let result = self.machine.schedule_retry();
            if self.apply(result) {
                self.observers.disconnected(Some(&error));
                let attempt = self.reconnect.on_link_lost(Instant::now());
                self.arm(attempt);
            }
        } else if let Some(transition) = self.machine.disconnect() {
            self.publish(transition);
            self.observers.disconnected(Some(&error));
        }
    }

    /// Forget the live link, if any. The caller decides whether the
    /// returned writer closes gracefully or aborts.
    fn teardown_link(&mut self) -> Option<Writer> {
        self.generation += 1;
        if let Some(reader) = self.reader.take() {
            reader.cancel();
        }
        self.heartbeat.stop();
        self.reassembler.clear();
        self.init_pending = false;
        self.in_flight = false;
        self.writer.take()
    }

    fn spawn_reader(&self, mut stream: LinkStream) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let generation = self.generation;
        let tx = self.link_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = stream.next() => {
                        let event = match item {
                            Some(Ok(message)) => LinkEvent::Inbound(message),
                            Some(Err(e)) => LinkEvent::Lost(e),
                            None => LinkEvent::Lost(TransportError::Closed),
                        };
                        let done = matches!(event, LinkEvent::Lost(_));
                        if tx.send((generation, event)).is_err() || done {
                            break;
                        }
                    }
                }
            }
        });
        cancel
    }

    /// Owns the sink for one link. Every write races the cancel token, so
    /// aborting the writer drops a write stuck on a full socket.
    fn spawn_writer(&self, mut sink: LinkSink) -> Writer {
        let (tx, mut rx) = mpsc::channel(WRITER_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let generation = self.generation;
        let events = self.link_tx.clone();
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                let (report, message) = match item {
                    Outgoing::Tracked { seq, message } => (Some(seq), message),
                    Outgoing::Control(message) => (None, message),
                    Outgoing::Close => {
                        tokio::select! {
                            _ = token.cancelled() => {}
                            _ = sink.close() => {}
                        }
                        break;
                    }
                };
                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = sink.send(message) => result,
                };
                let event = match (result, report) {
                    (Ok(()), Some(seq)) => LinkEvent::Written(seq),
                    (Ok(()), None) => continue,
                    (Err(e), _) => LinkEvent::Lost(e),
                };
                let done = matches!(event, LinkEvent::Lost(_));
                if events.send((generation, event)).is_err() || done {
                    break;
                }
            }
        });
        Writer { tx, cancel }
    }

    // ── Inbound ──────────────────────────────────────────────────

    fn inbound(&mut self, message: WireMessage) {
        let now = Instant::now();
        self.heartbeat.record_activity(now);
        match self.codec.decode_message(&message) {
            Ok(frame) => self.dispatch(frame, now),
            Err(e) => warn!(channel = %self.kind, error = %e, "dropping undecodable frame"),
        }
    }

    fn dispatch(&mut self, frame: Frame, now: Instant) {
        match frame {
            Frame::Chunk {
                message_id,
                part_index,
                total_parts,
                data,
            } => {
                for id in self.reassembler.evict_expired(now) {
                    warn!(channel = %self.kind, message_id = %id, "incomplete chunked message discarded");
                }
                match self
                    .reassembler
                    .accept(&message_id, part_index, total_parts, data, now)
                {
                    Ok(Some(payload)) => match self.codec.decode_str(&payload) {
                        Ok(Frame::Chunk { .. }) => {
                            warn!(channel = %self.kind, message_id = %message_id, "nested chunk frame dropped");
                        }
                        Ok(inner) => self.deliver(inner, now),
                        Err(e) => {
                            warn!(channel = %self.kind, message_id = %message_id, error = %e, "reassembled frame undecodable");
                        }
                    },
                    Ok(None) => {}
                    Err(e) => warn!(channel = %self.kind, error = %e, "chunk rejected"),
                }
            }
            Frame::Ping { timestamp } => self.transmit(&Frame::Pong { timestamp }),
            Frame::Pong { timestamp } => {
                debug!(channel = %self.kind, "pong");
                self.observers.pong(timestamp);
            }
            Frame::Unknown => {
                debug!(channel = %self.kind, "frame with unknown type ignored");
            }
            other => self.deliver(other, now),
        }
    }

    fn deliver(&self, frame: Frame, received_at: Instant) {
        debug!(channel = %self.kind, frame = frame.type_name(), "frame received");
        self.observers.frame(&InboundFrame::new(frame, received_at));
    }

    // ── Outbound ─────────────────────────────────────────────────

    fn drain_ready(&self) -> bool {
        self.writer.is_some()
            && !self.in_flight
            && self.machine.state().is_connected()
            && (self.init_pending || !lock(&self.queue).is_empty())
    }

    /// Queue a control frame behind whatever the writer already holds.
    /// Skipped when the writer is backed up.
    fn transmit(&mut self, frame: &Frame) {
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        if writer.tx.capacity() <= 1 {
            debug!(channel = %self.kind, frame = frame.type_name(), "writer backed up; control frame skipped");
            return;
        }
        match self.codec.encode_frame(frame) {
            Ok(message) => {
                let _ = writer.tx.try_send(Outgoing::Control(message));
            }
            Err(e) => warn!(channel = %self.kind, error = %e, "control frame not encodable"),
        }
    }

    /// Hand the `init` frame to the writer if owed, otherwise the head of
    /// the queue.
    fn drain_one(&mut self) {
        let (seq, message) = if self.init_pending {
            match self.codec.encode_frame(&Frame::init(self.identity.context())) {
                Ok(message) => (None, message),
                Err(e) => {
                    self.link_lost(e.into());
                    return;
                }
            }
        } else {
            match lock(&self.queue).front() {
                Some(envelope) => (Some(envelope.seq), envelope.payload.clone()),
                None => return,
            }
        };
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        match writer.tx.try_send(Outgoing::Tracked { seq, message }) {
            Ok(()) => {
                self.in_flight = true;
                if seq.is_none() {
                    self.init_pending = false;
                }
            }
            Err(_) => self.link_lost(TransportError::Closed),
        }
    }

    fn written(&mut self, seq: Option<u64>) {
        self.in_flight = false;
        match seq {
            Some(seq) => {
                lock(&self.queue).pop_front_if(seq);
                debug!(channel = %self.kind, seq, "frame sent");
            }
            None => debug!(channel = %self.kind, "init sent"),
        }
    }

    // ── Heartbeat ────────────────────────────────────────────────

    fn heartbeat_due(&mut self) {
        let now = Instant::now();
        match self.heartbeat.poll(now) {
            HeartbeatAction::Idle => {}
            HeartbeatAction::SendProbe => {
                self.heartbeat.probe_sent(now);
                let timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .ok()
                    .map(|d| d.as_millis() as u64);
                self.transmit(&Frame::ping(timestamp));
            }
            HeartbeatAction::TimedOut => {
                let waited = self
                    .heartbeat
                    .state()
                    .and_then(|s| s.last_probe_sent)
                    .map(|probe| now.saturating_duration_since(probe))
                    .unwrap_or_default();
                warn!(channel = %self.kind, waited_ms = waited.as_millis() as u64, "heartbeat timed out");
                self.link_lost(TransportError::HeartbeatTimeout(waited));
            }
        }
    }

    fn shutdown(&mut self) {
        self.abort_attempt();
        if let Some(writer) = self.teardown_link() {
            writer.close();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

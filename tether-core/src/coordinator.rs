//! Chat and shell sessions managed side by side.
//!
//! The two sessions share nothing: each has its own task, queue, backoff
//! and heartbeat, so one channel failing never stalls the other. The
//! coordinator only fans out `connect`/`disconnect` and reachability hints.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::identity::{ChannelIdentity, ChannelKind};
use crate::link::Connector;
use crate::session::ChannelSession;
use crate::state::ConnectionState;

#[derive(Debug, Clone)]
pub struct DualChannelCoordinator {
    chat: ChannelSession,
    shell: ChannelSession,
}

impl DualChannelCoordinator {
    /// Wrap two existing sessions. The first must be the chat channel.
    pub fn new(chat: ChannelSession, shell: ChannelSession) -> Result<Self, TransportError> {
        if chat.kind() != ChannelKind::Chat || shell.kind() != ChannelKind::Shell {
            return Err(TransportError::InvalidEndpoint(format!(
                "expected chat and shell sessions, got {} and {}",
                chat.kind(),
                shell.kind()
            )));
        }
        Ok(Self { chat, shell })
    }

    /// Open both channels over WebSocket with the same transport tuning.
    pub fn open(
        chat: ChannelIdentity,
        shell: ChannelIdentity,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        Self::new(
            ChannelSession::new(chat, config.clone()),
            ChannelSession::new(shell, config),
        )
    }

    pub fn with_connectors<A: Connector, B: Connector>(
        chat: (ChannelIdentity, A),
        shell: (ChannelIdentity, B),
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        Self::new(
            ChannelSession::with_connector(chat.0, config.clone(), chat.1),
            ChannelSession::with_connector(shell.0, config, shell.1),
        )
    }

    pub fn chat(&self) -> &ChannelSession {
        &self.chat
    }

    pub fn shell(&self) -> &ChannelSession {
        &self.shell
    }

    pub fn session(&self, kind: ChannelKind) -> &ChannelSession {
        match kind {
            ChannelKind::Chat => &self.chat,
            ChannelKind::Shell => &self.shell,
        }
    }

    pub async fn connect_all(&self) -> Result<(), TransportError> {
        let (chat, shell) = tokio::join!(self.chat.connect(), self.shell.connect());
        chat.and(shell)
    }

    pub async fn disconnect_all(&self) -> Result<(), TransportError> {
        let (chat, shell) = tokio::join!(self.chat.disconnect(), self.shell.disconnect());
        chat.and(shell)
    }

    /// Wait until both channels are connected, under one shared deadline.
    pub async fn wait_until_connected(&self, within: Duration) -> Result<(), TransportError> {
        let (chat, shell) = tokio::join!(
            self.chat.wait_for_state(ConnectionState::Connected, within),
            self.shell.wait_for_state(ConnectionState::Connected, within),
        );
        chat.and(shell)
    }

    /// Retry both channels immediately whenever `reachable` flips to
    /// `true`. The task ends when the sender is dropped.
    pub fn watch_reachability(&self, mut reachable: watch::Receiver<bool>) -> JoinHandle<()> {
        let chat = self.chat.clone();
        let shell = self.shell.clone();
        tokio::spawn(async move {
            let mut was_reachable = *reachable.borrow_and_update();
            while reachable.changed().await.is_ok() {
                let now_reachable = *reachable.borrow_and_update();
                if now_reachable && !was_reachable {
                    info!("network reachable again; retrying channels");
                    chat.retry_now();
                    shell.retry_now();
                } else {
                    debug!(reachable = now_reachable, "reachability changed");
                }
                was_reachable = now_reachable;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeartbeatConfig, ReconnectConfig};
    use crate::identity::ChannelContext;
    use crate::protocol::Frame;
    use crate::testing::mock;

    const WAIT: Duration = Duration::from_secs(60);

    fn config() -> TransportConfig {
        TransportConfig {
            reconnect: ReconnectConfig {
                jitter: 0.0,
                max_attempts: 2,
                ..Default::default()
            },
            heartbeat: HeartbeatConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn identities() -> (ChannelIdentity, ChannelIdentity) {
        (
            ChannelIdentity::new("ws://localhost:3001/ws", ChannelContext::chat("/repo")).unwrap(),
            ChannelIdentity::new("ws://localhost:3001/shell", ChannelContext::shell("/repo")).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_swapped_sessions() {
        let (chat_id, shell_id) = identities();
        let (a, _ra) = mock();
        let (b, _rb) = mock();
        let err = DualChannelCoordinator::with_connectors((shell_id, a), (chat_id, b), config()).unwrap_err();
        assert!(matches!(err, TransportError::InvalidEndpoint(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn both_channels_connect() {
        let (chat_id, shell_id) = identities();
        let (chat_conn, mut chat_remote) = mock();
        let (shell_conn, mut shell_remote) = mock();
        let coord =
            DualChannelCoordinator::with_connectors((chat_id, chat_conn), (shell_id, shell_conn), config()).unwrap();

        coord.connect_all().await.unwrap();
        let mut chat_server = chat_remote.accept().await;
        let mut shell_server = shell_remote.accept().await;
        coord.wait_until_connected(WAIT).await.unwrap();

        match chat_server.recv_frame().await {
            Frame::Init { kind, .. } => assert_eq!(kind, ChannelKind::Chat),
            other => panic!("unexpected {other:?}"),
        }
        match shell_server.recv_frame().await {
            Frame::Init { kind, cols, rows, .. } => {
                assert_eq!(kind, ChannelKind::Shell);
                assert_eq!((cols, rows), (Some(80), Some(24)));
            }
            other => panic!("unexpected {other:?}"),
        }

        coord.disconnect_all().await.unwrap();
        assert_eq!(coord.chat().state(), ConnectionState::Disconnected);
        assert_eq!(coord.shell().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn one_channel_failing_leaves_the_other_alone() {
        let (chat_id, shell_id) = identities();
        let (chat_conn, mut chat_remote) = mock();
        let (shell_conn, shell_remote) = mock();
        shell_remote.refuse_next(10);
        let coord =
            DualChannelCoordinator::with_connectors((chat_id, chat_conn), (shell_id, shell_conn), config()).unwrap();

        coord.connect_all().await.unwrap();
        let mut chat_server = chat_remote.accept().await;
        coord.shell().wait_for_state(ConnectionState::Failed, WAIT).await.unwrap();
        assert_eq!(coord.chat().state(), ConnectionState::Connected);

        coord.chat().send(&Frame::claude_command("still here")).unwrap();
        assert!(matches!(chat_server.recv_frame().await, Frame::Init { .. }));
        assert!(matches!(chat_server.recv_frame().await, Frame::ClaudeCommand { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_when_one_side_is_down() {
        let (chat_id, shell_id) = identities();
        let (chat_conn, mut chat_remote) = mock();
        let (shell_conn, shell_remote) = mock();
        shell_remote.hold_connects(true);
        let coord =
            DualChannelCoordinator::with_connectors((chat_id, chat_conn), (shell_id, shell_conn), config()).unwrap();

        coord.connect_all().await.unwrap();
        let _chat_server = chat_remote.accept().await;
        let err = coord.wait_until_connected(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout(Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn reachability_pulls_retries_forward() {
        let mut cfg = config();
        cfg.reconnect.base_delay_ms = 20_000;
        cfg.reconnect.max_attempts = 0;
        let (chat_id, shell_id) = identities();
        let (chat_conn, mut chat_remote) = mock();
        let (shell_conn, mut shell_remote) = mock();
        chat_remote.refuse_next(1);
        shell_remote.refuse_next(1);
        let coord =
            DualChannelCoordinator::with_connectors((chat_id, chat_conn), (shell_id, shell_conn), cfg).unwrap();

        let (net_tx, net_rx) = watch::channel(true);
        let watcher = coord.watch_reachability(net_rx);

        coord.connect_all().await.unwrap();
        coord.chat().wait_for_state(ConnectionState::Reconnecting, WAIT).await.unwrap();
        coord.shell().wait_for_state(ConnectionState::Reconnecting, WAIT).await.unwrap();

        net_tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let t0 = tokio::time::Instant::now();
        net_tx.send(true).unwrap();
        let _chat_server = chat_remote.accept().await;
        let _shell_server = shell_remote.accept().await;
        coord.wait_until_connected(WAIT).await.unwrap();
        assert!(t0.elapsed() < Duration::from_secs(1));

        drop(net_tx);
        watcher.await.unwrap();
    }
}

//! Line-oriented console over the chat and shell channels.
//!
//! Plain lines go to the assistant; lines starting with `!` run in the
//! shell. `/quit` ends the session.

use std::time::Duration;

use tether_core::{
    ChannelEvent, ChannelKind, DualChannelCoordinator, Frame, MessageLifecycleBridge, MessageStatus,
    TransportError,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Chat(String),
    Shell(String),
    Quit,
    Blank,
}

pub fn parse_line(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        Input::Blank
    } else if line == "/quit" {
        Input::Quit
    } else if let Some(command) = line.strip_prefix('!') {
        match command.trim() {
            "" => Input::Blank,
            command => Input::Shell(command.to_owned()),
        }
    } else {
        Input::Chat(line.to_owned())
    }
}

/// Text to print for an inbound frame, if any.
pub fn render(kind: ChannelKind, frame: &Frame) -> Option<String> {
    let text = match frame {
        Frame::Message {
            content: Some(content),
            role,
            ..
        } => format!("{}> {content}", role.as_deref().unwrap_or("assistant")),
        Frame::ShellOutput { data } => data.trim_end().to_owned(),
        Frame::ShellError { error } => format!("stderr: {}", error.trim_end()),
        Frame::Error { message, code } => match code {
            Some(code) => format!("error [{code}]: {message}"),
            None => format!("error: {message}"),
        },
        _ => return None,
    };
    Some(format!("[{kind}] {text}"))
}

pub struct Console {
    coordinator: DualChannelCoordinator,
    bridge: MessageLifecycleBridge,
    ack_timeout: Option<Duration>,
}

impl Console {
    pub fn new(coordinator: DualChannelCoordinator, ack_timeout: Option<Duration>) -> Self {
        let chat = coordinator.chat().clone();
        let bridge = match ack_timeout {
            Some(limit) => MessageLifecycleBridge::with_ack_timeout(chat, limit),
            None => MessageLifecycleBridge::attach(chat),
        };
        bridge.on_status_changed(|change| match change.status {
            MessageStatus::Failed => {
                eprintln!("[chat] message {} failed: {:?}", change.message_id, change.reason)
            }
            _ => debug!(message_id = %change.message_id, status = %change.status, "status"),
        });
        Self {
            coordinator,
            bridge,
            ack_timeout,
        }
    }

    pub fn bridge(&self) -> &MessageLifecycleBridge {
        &self.bridge
    }

    /// Relay `input` until EOF or `/quit`, printing inbound frames.
    pub async fn run<R>(&self, input: R) -> Result<(), TransportError>
    where
        R: AsyncBufRead + Unpin,
    {
        let printers = [
            spawn_printer(self.coordinator.chat().events()),
            spawn_printer(self.coordinator.shell().events()),
        ];

        let mut lines = input.lines();
        let mut expiry = tokio::time::interval(
            self.ack_timeout
                .map(|limit| (limit / 4).max(Duration::from_millis(100)))
                .unwrap_or(Duration::from_secs(3600)),
        );

        let result = loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break Ok(()),
                        Err(e) => break Err(TransportError::from(e)),
                    };
                    match parse_line(&line) {
                        Input::Quit => break Ok(()),
                        Input::Blank => {}
                        input => self.dispatch(input),
                    }
                }
                _ = expiry.tick(), if self.ack_timeout.is_some() => {
                    self.bridge.expire();
                }
            }
        };

        for printer in printers {
            printer.abort();
        }
        result
    }

    fn dispatch(&self, input: Input) {
        let sent = match input {
            Input::Chat(text) => self.bridge.send_message(text).map(drop),
            Input::Shell(command) => self
                .coordinator
                .shell()
                .send(&Frame::shell_command(command))
                .map(drop),
            Input::Quit | Input::Blank => Ok(()),
        };
        if let Err(e) = sent {
            warn!(error = %e, "send failed");
        }
    }
}

fn spawn_printer(mut events: mpsc::UnboundedReceiver<ChannelEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Frame { kind, frame } => {
                    if let Some(text) = render(kind, &frame.frame) {
                        println!("{text}");
                    }
                }
                ChannelEvent::Connected(kind) => eprintln!("[{kind}] connected"),
                ChannelEvent::Disconnected { kind, error: Some(e) } => {
                    eprintln!("[{kind}] disconnected: {e}")
                }
                _ => {}
            }
        }
    })
}

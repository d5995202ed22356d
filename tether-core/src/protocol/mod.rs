//! Wire frames exchanged with the backend.
//!
//! # Wire Protocol
//!
//! Every frame is one JSON object discriminated by `type`:
//!
//! ```text
//! Client ──[init]───────────────────► Server   once per connect
//! Client ──[claude-command]─────────► Server   chat
//! Client ──[shell-command]──────────► Server   shell
//! Server ──[message]────────────────► Client   chat reply / ack
//! Server ──[shell-output|shell-error]► Client  shell
//! Server ──[read-receipt]───────────► Client   chat
//! Either ──[ping|pong]──────────────► Either   heartbeat
//! Either ──[chunk]──────────────────► Either   one part of a large frame
//! Server ──[error]──────────────────► Client
//! ```
//!
//! Field names are camelCase on the wire. Unrecognised `type` values decode
//! to [`Frame::Unknown`].

use serde::{Deserialize, Serialize};

use crate::identity::{ChannelContext, ChannelKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Frame {
    /// First frame after every successful connect.
    #[serde(rename_all = "camelCase")]
    Init {
        kind: ChannelKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
    },

    /// A prompt for the assistant.
    #[serde(rename_all = "camelCase")]
    ClaudeCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Client-assigned id echoed back as `replyToMessageId`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// A command line for the terminal.
    #[serde(rename_all = "camelCase")]
    ShellCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },

    /// Assistant output on the chat channel.
    #[serde(rename_all = "camelCase")]
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_message_id: Option<String>,
    },

    /// Terminal stdout.
    ShellOutput { data: String },

    /// Terminal stderr or a failure to run the command.
    ShellError { error: String },

    /// The user has seen the reply to `message_id`.
    #[serde(rename_all = "camelCase")]
    ReadReceipt { message_id: String },

    /// One part of a frame too large to send whole.
    #[serde(rename_all = "camelCase")]
    Chunk {
        message_id: String,
        part_index: u32,
        total_parts: u32,
        data: String,
    },

    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

impl Frame {
    /// The `init` frame for a channel context.
    pub fn init(context: &ChannelContext) -> Self {
        match context {
            ChannelContext::Chat {
                project_path,
                session_id,
            } => Frame::Init {
                kind: ChannelKind::Chat,
                project_path: Some(project_path.clone()),
                session_id: session_id.clone(),
                cwd: None,
                cols: None,
                rows: None,
            },
            ChannelContext::Shell {
                working_dir,
                cols,
                rows,
            } => Frame::Init {
                kind: ChannelKind::Shell,
                project_path: Some(working_dir.clone()),
                session_id: None,
                cwd: Some(working_dir.clone()),
                cols: Some(*cols),
                rows: Some(*rows),
            },
        }
    }

    pub fn claude_command(command: impl Into<String>) -> Self {
        Frame::ClaudeCommand {
            command: command.into(),
            project_path: None,
            session_id: None,
            message_id: None,
        }
    }

    pub fn shell_command(command: impl Into<String>) -> Self {
        Frame::ShellCommand {
            command: command.into(),
            cwd: None,
        }
    }

    pub fn ping(timestamp: Option<u64>) -> Self {
        Frame::Ping { timestamp }
    }

    /// Set the client message id on a `claude-command`. Other frames are
    /// returned unchanged.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        if let Frame::ClaudeCommand { message_id, .. } = &mut self {
            *message_id = Some(id.into());
        }
        self
    }

    /// Wire discriminator, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Init { .. } => "init",
            Frame::ClaudeCommand { .. } => "claude-command",
            Frame::ShellCommand { .. } => "shell-command",
            Frame::Message { .. } => "message",
            Frame::ShellOutput { .. } => "shell-output",
            Frame::ShellError { .. } => "shell-error",
            Frame::ReadReceipt { .. } => "read-receipt",
            Frame::Chunk { .. } => "chunk",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
            Frame::Error { .. } => "error",
            Frame::Unknown => "unknown",
        }
    }

    /// Client message id carried by an outbound chat command.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Frame::ClaudeCommand { message_id, .. } => message_id.as_deref(),
            _ => None,
        }
    }
}

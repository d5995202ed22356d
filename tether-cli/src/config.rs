//! Configuration for the console driver.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tether_core::{ChannelContext, ChannelIdentity, TransportConfig, TransportError};
use url::Url;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Backend location and credentials.
    pub server: ServerConfig,
    /// Chat channel context.
    pub chat: ChatConfig,
    /// Shell channel context.
    pub shell: ShellConfig,
    /// Reconnect, heartbeat, queue and chunking tuning.
    pub transport: TransportConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Backend endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the backend (`ws://` or `wss://`).
    pub url: String,
    /// Path of the chat endpoint, joined onto `url`.
    pub chat_path: String,
    /// Path of the shell endpoint, joined onto `url`.
    pub shell_path: String,
    /// Auth token sent as `?token=`. Empty means none.
    pub token: String,
}

/// Chat channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Project the assistant works in.
    pub project_path: String,
    /// Resume an existing assistant session. Empty starts a new one.
    pub session_id: String,
    /// Seconds a message may wait for a reply before it is marked failed
    /// (0 = wait forever).
    pub ack_timeout_secs: u64,
}

/// Shell channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Initial working directory. Empty uses the chat project path.
    pub working_dir: String,
    pub cols: u16,
    pub rows: u16,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001".into(),
            chat_path: "/ws".into(),
            shell_path: "/shell".into(),
            token: String::new(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            project_path: ".".into(),
            session_id: String::new(),
            ack_timeout_secs: 120,
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            working_dir: String::new(),
            cols: 80,
            rows: 24,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Identity of the chat channel.
    pub fn chat_identity(&self) -> Result<ChannelIdentity, TransportError> {
        let context = ChannelContext::Chat {
            project_path: self.chat.project_path.clone(),
            session_id: non_empty(&self.chat.session_id),
        };
        self.identity(&self.server.chat_path, context)
    }

    /// Identity of the shell channel.
    pub fn shell_identity(&self) -> Result<ChannelIdentity, TransportError> {
        let working_dir = non_empty(&self.shell.working_dir).unwrap_or_else(|| self.chat.project_path.clone());
        let context = ChannelContext::Shell {
            working_dir,
            cols: self.shell.cols.max(1),
            rows: self.shell.rows.max(1),
        };
        self.identity(&self.server.shell_path, context)
    }

    fn identity(&self, path: &str, context: ChannelContext) -> Result<ChannelIdentity, TransportError> {
        let endpoint = Url::parse(&self.server.url)?.join(path)?;
        let identity = ChannelIdentity::new(endpoint.as_str(), context)?;
        Ok(match non_empty(&self.server.token) {
            Some(token) => identity.with_auth_token(token),
            None => identity,
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_owned())
}

// ── Tests ────────────────────────────────────────────────────────

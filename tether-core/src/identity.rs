//! Who a channel talks to and on behalf of what.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TransportError;

/// The two logical channels the client keeps open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Chat,
    Shell,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => f.write_str("chat"),
            Self::Shell => f.write_str("shell"),
        }
    }
}

/// Context carried in the `init` frame after every connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelContext {
    Chat {
        project_path: String,
        session_id: Option<String>,
    },
    Shell {
        working_dir: String,
        cols: u16,
        rows: u16,
    },
}

impl ChannelContext {
    pub fn chat(project_path: impl Into<String>) -> Self {
        Self::Chat {
            project_path: project_path.into(),
            session_id: None,
        }
    }

    /// Shell context with the conventional 80x24 geometry.
    pub fn shell(working_dir: impl Into<String>) -> Self {
        Self::Shell {
            working_dir: working_dir.into(),
            cols: 80,
            rows: 24,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Chat { .. } => ChannelKind::Chat,
            Self::Shell { .. } => ChannelKind::Shell,
        }
    }
}

/// Immutable target of one channel session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    endpoint: Url,
    context: ChannelContext,
    auth_token: Option<String>,
}

impl ChannelIdentity {
    /// Build an identity. Only `ws` and `wss` endpoints are accepted.
    pub fn new(endpoint: &str, context: ChannelContext) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint)?;
        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::InvalidEndpoint(format!(
                    "unsupported scheme `{other}`"
                )));
            }
        }
        Ok(Self {
            endpoint,
            context,
            auth_token: None,
        })
    }

    /// Attach the token issued by the authentication collaborator.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn kind(&self) -> ChannelKind {
        self.context.kind()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn context(&self) -> &ChannelContext {
        &self.context
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// The URL actually dialled: the endpoint plus `?token=` when a token
    /// is set.
    pub fn connect_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("token", token);
        }
        url
    }
}

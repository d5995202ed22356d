//! Socket connector seam.
//!
//! A [`Connector`] dials a channel's endpoint and yields a [`Link`]: a sink
//! for outbound messages and a stream of inbound ones. Sessions only ever
//! see these two halves, so the WebSocket client can be swapped for an
//! in-memory pair in tests.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::codec::WireMessage;
use crate::error::TransportError;
use crate::identity::ChannelIdentity;

pub type LinkSink = Pin<Box<dyn Sink<WireMessage, Error = TransportError> + Send>>;
pub type LinkStream = Pin<Box<dyn Stream<Item = Result<WireMessage, TransportError>> + Send>>;

/// One open socket.
pub struct Link {
    pub sink: LinkSink,
    pub stream: LinkStream,
}

impl Link {
    pub fn new(sink: LinkSink, stream: LinkStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open one socket to the identity's endpoint. The caller applies the
    /// connect timeout.
    async fn connect(&self, identity: &ChannelIdentity) -> Result<Link, TransportError>;
}

// ── WebSocket ────────────────────────────────────────────────────

/// Production connector over `tokio-tungstenite`.
///
/// Control frames stay at this layer: pings are answered by tungstenite,
/// and a close frame ends the inbound stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, identity: &ChannelIdentity) -> Result<Link, TransportError> {
        let url = identity.connect_url();
        debug!(channel = %identity.kind(), endpoint = %identity.endpoint(), "dialling");

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = ws.split();

        let sink = sink.with(|msg: WireMessage| future::ready(Ok::<_, TransportError>(Message::from(msg))));
        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(Message::Text(text)) => Some(Ok(WireMessage::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => Some(Ok(WireMessage::Binary(bytes))),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "close frame received");
                    None
                }
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(Link::new(Box::pin(sink), Box::pin(stream)))
    }
}

impl From<WireMessage> for Message {
    fn from(msg: WireMessage) -> Self {
        match msg {
            WireMessage::Text(text) => Message::Text(text.into()),
            WireMessage::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

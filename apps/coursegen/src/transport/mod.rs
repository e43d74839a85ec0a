//! Realtime channel plumbing: a connector opens one channel and hands back a
//! pair of pipes; the websocket module drives the reconnecting state machine
//! on top of it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

#[cfg(test)]
pub(crate) mod mock;
pub mod websocket;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid channel address: {0}")]
    Address(String),
    #[error("channel refused: {0}")]
    Refused(String),
}

/// Commands from the connection manager to an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    Text(String),
    Close { code: u16, reason: String },
}

/// What an open channel reports back, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Closed { code: u16 },
    Error(String),
}

/// One opened channel. Dropping `outbound` asks the channel to close; the
/// channel ends `inbound` after its final `Closed` or `Error` event.
pub struct ChannelPipes {
    pub outbound: mpsc::UnboundedSender<OutboundCommand>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a channel to `address`. Returns once the channel is usable.
    async fn open(&self, address: &Url) -> Result<ChannelPipes, TransportError>;
}

/// Address without its query string, for logs; the query may carry a token.
pub(crate) fn redacted(address: &Url) -> String {
    let mut shown = address.clone();
    shown.set_query(None);
    shown.to_string()
}

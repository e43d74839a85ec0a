use crate::transport::{ChannelPipes, Connector, OutboundCommand, TransportError, TransportEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use url::Url;

/// In-memory connector. Every successful `open` hands the far end of the new
/// channel to the test as a [`MockPeer`].
pub struct MockConnector {
    opened: Mutex<Vec<Url>>,
    refusing: AtomicBool,
    peers: mpsc::UnboundedSender<MockPeer>,
}

pub struct MockPeer {
    pub address: Url,
    outbound: mpsc::UnboundedReceiver<OutboundCommand>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            opened: Mutex::new(Vec::new()),
            refusing: AtomicBool::new(false),
            peers,
        });
        (connector, peers_rx)
    }

    /// While set, `open` fails as if the server were unreachable.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn opened(&self) -> Vec<Url> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, address: &Url) -> Result<ChannelPipes, TransportError> {
        self.opened.lock().push(address.clone());
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Refused("connection refused".into()));
        }
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            address: address.clone(),
            outbound: outbound_rx,
            inbound: inbound_tx,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Refused("mock peer receiver dropped".into()))?;
        Ok(ChannelPipes {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

impl MockPeer {
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Message(text.into()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.inbound.send(TransportEvent::Closed { code });
    }

    pub fn fail(&self, error: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Error(error.into()));
    }

    /// Next command the manager sent, or `None` once it dropped the channel.
    pub async fn next_command(&mut self) -> Option<OutboundCommand> {
        self.outbound.recv().await
    }

    pub fn try_command(&mut self) -> Option<OutboundCommand> {
        self.outbound.try_recv().ok()
    }
}

use crate::transport::{ChannelPipes, Connector, OutboundCommand, TransportError, TransportEvent, redacted};
use async_trait::async_trait;
use coursegen_proto::{CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

/// How long to wait for the peer to acknowledge a close we initiated.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens audit channels over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, address: &Url) -> Result<ChannelPipes, TransportError> {
        let (ws_stream, _) = connect_async(address.as_str()).await?;
        debug!(
            target: "coursegen::channel",
            address = %redacted(address),
            "websocket handshake complete"
        );

        let (tx_out, rx_out) = mpsc::unbounded_channel();
        let (tx_in, rx_in) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws_stream, rx_out, tx_in));

        Ok(ChannelPipes {
            outbound: tx_out,
            inbound: rx_in,
        })
    }
}

/// Moves frames between the socket and the manager's pipes until either side
/// closes. Always finishes with exactly one `Closed` or `Error` event.
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<OutboundCommand>,
    tx_in: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut sink, mut stream) = ws_stream.split();

    let final_event = loop {
        tokio::select! {
            command = rx_out.recv() => match command {
                Some(OutboundCommand::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        break TransportEvent::Error(err.to_string());
                    }
                }
                Some(OutboundCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    // Drain until the peer acknowledges; frames after our
                    // close are not delivered.
                    let _ = tokio::time::timeout(CLOSE_GRACE, async {
                        while let Some(Ok(message)) = stream.next().await {
                            if matches!(message, Message::Close(_)) {
                                break;
                            }
                        }
                    })
                    .await;
                    break TransportEvent::Closed { code };
                }
                None => {
                    // Manager dropped the channel.
                    let frame = CloseFrame {
                        code: CloseCode::from(CLOSE_NORMAL),
                        reason: "".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break TransportEvent::Closed { code: CLOSE_NORMAL };
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if tx_in.send(TransportEvent::Message(text)).is_err() {
                        break TransportEvent::Closed { code: CLOSE_NORMAL };
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    if tx_in.send(TransportEvent::Message(text)).is_err() {
                        break TransportEvent::Closed { code: CLOSE_NORMAL };
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame
                        .map(|frame| u16::from(frame.code))
                        .unwrap_or(CLOSE_NO_STATUS);
                    break TransportEvent::Closed { code };
                }
                Some(Ok(other)) => {
                    trace!(target: "coursegen::channel", ?other, "ignoring control frame");
                }
                Some(Err(err)) => break TransportEvent::Error(err.to_string()),
                None => break TransportEvent::Closed { code: CLOSE_ABNORMAL },
            },
        }
    };

    let _ = tx_in.send(final_event);
}

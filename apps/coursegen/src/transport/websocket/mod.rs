//! Reconnecting audit channel.
//!
//! [`ConnectionManager`] owns at most one open channel. Each channel gets a
//! generation number; events and timers from an older generation are ignored,
//! so tearing a channel down never runs its reconnect path.

use crate::transport::{ChannelPipes, Connector, OutboundCommand, TransportEvent, redacted};
use coursegen_proto::{
    CLOSE_ABNORMAL, CLOSE_DUPLICATE_SESSION, CLOSE_NORMAL, ControlSignal, InboundFrame,
    TerminalReason, parse_frame,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

pub mod config;
pub mod connector;

pub use config::ChannelAddress;
pub use connector::WebSocketConnector;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// A reconnect timer is pending.
    Reconnecting,
    /// Closed by the server for a reason that retrying cannot fix.
    Terminal(TerminalReason),
    /// Closed with reconnection disabled, usually by `disconnect`.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed(CloseDisposition),
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn terminal_reason(self) -> Option<TerminalReason> {
        match self {
            ConnectionState::Closed(CloseDisposition::Terminal(reason)) => Some(reason),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed(CloseDisposition::Reconnecting) => "reconnecting",
            ConnectionState::Closed(CloseDisposition::Terminal(_)) => "terminated",
            ConnectionState::Closed(CloseDisposition::Stopped) => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Frame(InboundFrame),
    State(ConnectionState),
}

struct ChannelState {
    status: ConnectionState,
    address: Option<Url>,
    should_reconnect: bool,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<OutboundCommand>>,
    /// Close code we asked for; reported instead of whatever the peer echoes.
    requested_close: Option<u16>,
    reconnect_timer: Option<JoinHandle<()>>,
    attempts: u32,
}

struct Inner {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: Mutex<ChannelState>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// The receiver yields every forwarded frame and state change in order.
    /// All methods must be called from within a tokio runtime.
    pub fn new(
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(Inner {
                connector,
                reconnect_delay,
                events,
                state: Mutex::new(ChannelState {
                    status: ConnectionState::Idle,
                    address: None,
                    should_reconnect: true,
                    generation: 0,
                    outbound: None,
                    requested_close: None,
                    reconnect_timer: None,
                    attempts: 0,
                }),
            }),
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().status
    }

    pub fn address(&self) -> Option<Url> {
        self.inner.state.lock().address.clone()
    }

    pub fn should_reconnect(&self) -> bool {
        self.inner.state.lock().should_reconnect
    }

    /// Disabling reconnection cancels a pending timer; the next non-terminal
    /// close then ends in `Closed(Stopped)`.
    pub fn set_should_reconnect(&self, enabled: bool) {
        let mut state = self.inner.state.lock();
        state.should_reconnect = enabled;
        if !enabled {
            cancel_timer(&mut state);
            if state.status == ConnectionState::Closed(CloseDisposition::Reconnecting) {
                self.inner
                    .set_status(&mut state, ConnectionState::Closed(CloseDisposition::Stopped));
            }
        }
    }

    pub fn connect(&self, address: Url) {
        let mut state = self.inner.state.lock();
        if state.address.as_ref() == Some(&address)
            && matches!(
                state.status,
                ConnectionState::Open | ConnectionState::Connecting
            )
        {
            debug!(
                target: "coursegen::channel",
                address = %redacted(&address),
                "already connected; ignoring connect"
            );
            return;
        }

        cancel_timer(&mut state);
        self.inner.teardown(&mut state);
        state.should_reconnect = true;
        state.attempts = 0;
        state.address = Some(address.clone());
        self.inner.open_channel(&mut state, address);
    }

    /// Points later reconnects at `address` without touching the current
    /// channel. Used once the server assigns the session id.
    pub fn retarget(&self, address: Url) {
        let mut state = self.inner.state.lock();
        if state.address.as_ref() == Some(&address) {
            return;
        }
        debug!(
            target: "coursegen::channel",
            address = %redacted(&address),
            "reconnect address updated"
        );
        state.address = Some(address);
    }

    /// Re-opens the last address. Returns false when reconnection is disabled
    /// or nothing was ever connected.
    pub fn reconnect(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.should_reconnect {
            return false;
        }
        let Some(address) = state.address.clone() else {
            return false;
        };
        cancel_timer(&mut state);
        self.inner.teardown(&mut state);
        self.inner.open_channel(&mut state, address);
        true
    }

    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        cancel_timer(&mut state);
        state.should_reconnect = false;
        // A terminal close we already asked for still decides the outcome.
        let pending_terminal = state
            .requested_close
            .and_then(TerminalReason::from_close_code);
        self.inner.teardown(&mut state);
        match state.status {
            ConnectionState::Idle | ConnectionState::Closed(CloseDisposition::Terminal(_)) => {}
            _ => {
                let disposition = pending_terminal
                    .map_or(CloseDisposition::Stopped, CloseDisposition::Terminal);
                info!(
                    target: "coursegen::channel",
                    terminal = pending_terminal.is_some(),
                    "channel disconnected"
                );
                self.inner
                    .set_status(&mut state, ConnectionState::Closed(disposition));
            }
        }
    }

    /// Sends a text frame if the channel is open. Nothing is queued.
    pub fn send(&self, text: impl Into<String>) -> bool {
        let state = self.inner.state.lock();
        if !state.status.is_open() {
            debug!(
                target: "coursegen::channel",
                state = state.status.label(),
                "dropping outbound frame; channel not open"
            );
            return false;
        }
        state
            .outbound
            .as_ref()
            .is_some_and(|outbound| outbound.send(OutboundCommand::Text(text.into())).is_ok())
    }
}

fn cancel_timer(state: &mut ChannelState) {
    if let Some(timer) = state.reconnect_timer.take() {
        timer.abort();
    }
}

impl Inner {
    fn set_status(&self, state: &mut ChannelState, status: ConnectionState) {
        if state.status == status {
            return;
        }
        state.status = status;
        let _ = self.events.send(ConnectionEvent::State(status));
    }

    /// Closes the current channel, if any, without running its close path.
    fn teardown(&self, state: &mut ChannelState) {
        state.generation += 1;
        state.requested_close = None;
        if let Some(outbound) = state.outbound.take() {
            let _ = outbound.send(OutboundCommand::Close {
                code: CLOSE_NORMAL,
                reason: String::new(),
            });
        }
    }

    fn open_channel(self: &Arc<Self>, state: &mut ChannelState, address: Url) {
        state.generation += 1;
        let generation = state.generation;
        info!(
            target: "coursegen::channel",
            address = %redacted(&address),
            generation,
            "opening channel"
        );
        self.set_status(state, ConnectionState::Connecting);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_channel(generation, address).await;
        });
    }

    async fn run_channel(self: Arc<Self>, generation: u64, address: Url) {
        let ChannelPipes {
            outbound,
            mut inbound,
        } = match self.connector.open(&address).await {
            Ok(pipes) => pipes,
            Err(err) => {
                warn!(
                    target: "coursegen::channel",
                    address = %redacted(&address),
                    error = %err,
                    "failed to open channel"
                );
                self.on_closed(generation, CLOSE_ABNORMAL);
                return;
            }
        };

        if !self.on_open(generation, outbound) {
            return;
        }

        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Message(text) => {
                    if !self.on_message(generation, &text) {
                        return;
                    }
                }
                TransportEvent::Error(err) => {
                    warn!(target: "coursegen::channel", error = %err, "channel error");
                    self.on_closed(generation, CLOSE_ABNORMAL);
                    return;
                }
                TransportEvent::Closed { code } => {
                    self.on_closed(generation, code);
                    return;
                }
            }
        }
        self.on_closed(generation, CLOSE_ABNORMAL);
    }

    fn on_open(&self, generation: u64, outbound: mpsc::UnboundedSender<OutboundCommand>) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            let _ = outbound.send(OutboundCommand::Close {
                code: CLOSE_NORMAL,
                reason: String::new(),
            });
            return false;
        }
        state.outbound = Some(outbound);
        state.attempts = 0;
        info!(target: "coursegen::channel", generation, "channel open");
        self.set_status(&mut state, ConnectionState::Open);
        true
    }

    /// Returns false once the channel no longer belongs to this generation.
    fn on_message(&self, generation: u64, text: &str) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        match parse_frame(text) {
            InboundFrame::Control(ControlSignal::DuplicateConnection { message }) => {
                warn!(
                    target: "coursegen::channel",
                    message = message.as_deref().unwrap_or(""),
                    "session opened elsewhere; closing channel"
                );
                state.should_reconnect = false;
                state.requested_close = Some(CLOSE_DUPLICATE_SESSION);
                if let Some(outbound) = state.outbound.as_ref() {
                    let _ = outbound.send(OutboundCommand::Close {
                        code: CLOSE_DUPLICATE_SESSION,
                        reason: message.unwrap_or_default(),
                    });
                }
                self.set_status(&mut state, ConnectionState::Closing);
            }
            frame => {
                if state.status == ConnectionState::Closing {
                    return true;
                }
                let _ = self.events.send(ConnectionEvent::Frame(frame));
            }
        }
        true
    }

    fn on_closed(self: &Arc<Self>, generation: u64, code: u16) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        state.outbound = None;
        let code = state.requested_close.take().unwrap_or(code);

        let disposition = if let Some(reason) = TerminalReason::from_close_code(code) {
            warn!(
                target: "coursegen::channel",
                code,
                reason = reason.describe(),
                "channel closed; not reconnecting"
            );
            state.should_reconnect = false;
            cancel_timer(&mut state);
            CloseDisposition::Terminal(reason)
        } else if state.should_reconnect && state.address.is_some() {
            self.schedule_reconnect(&mut state);
            info!(
                target: "coursegen::channel",
                code,
                attempt = state.attempts,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "channel closed; reconnect scheduled"
            );
            CloseDisposition::Reconnecting
        } else {
            info!(target: "coursegen::channel", code, "channel closed");
            CloseDisposition::Stopped
        };
        self.set_status(&mut state, ConnectionState::Closed(disposition));
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ChannelState) {
        cancel_timer(state);
        state.attempts += 1;
        let generation = state.generation;
        let delay = self.reconnect_delay;
        let inner = Arc::clone(self);
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect(generation);
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation
            || !state.should_reconnect
            || state.status != ConnectionState::Closed(CloseDisposition::Reconnecting)
        {
            return;
        }
        state.reconnect_timer = None;
        let Some(address) = state.address.clone() else {
            return;
        };
        self.open_channel(&mut state, address);
    }
}

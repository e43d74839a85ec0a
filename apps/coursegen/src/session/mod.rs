//! Audit chat session: ties the realtime channel, the message log and the
//! audit HTTP endpoints together for one session id.

pub mod log;

use crate::api::{CourseApi, GatewayError};
use crate::auth::{LogoutReason, RefreshCoordinator};
use crate::transport::TransportError;
use crate::transport::websocket::{
    ChannelAddress, ConnectionEvent, ConnectionManager, ConnectionState,
};
use coursegen_proto::{ControlSignal, InboundFrame, SessionEvent, SessionStatus};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use url::Url;

pub use log::SessionMessageLog;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session id has been assigned yet")]
    NoSession,
    #[error("channel is not open")]
    NotConnected,
    #[error("waiting for the server's reply")]
    AwaitingReply,
    #[error("session is not accepting messages ({})", .0.as_str())]
    NotAccepting(SessionStatus),
    #[error("message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What changed after handling one channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// The log was replaced by a server snapshot.
    Snapshot { session_id: Option<String> },
    Appended(SessionEvent),
    Status(SessionStatus),
    Connection(ConnectionState),
    LoggedOut(LogoutReason),
}

pub struct AuditSession {
    manager: ConnectionManager,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    api: CourseApi,
    logout_rx: broadcast::Receiver<LogoutReason>,
    listen_logout: bool,
    ws_host: String,
    session_id: Option<String>,
    log: SessionMessageLog,
}

impl AuditSession {
    pub fn new(
        manager: ConnectionManager,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
        api: CourseApi,
        ws_host: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        let logout_rx = api.gateway().coordinator().subscribe_logout();
        Self {
            manager,
            events,
            api,
            logout_rx,
            listen_logout: true,
            ws_host: ws_host.into(),
            session_id,
            log: SessionMessageLog::new(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn log(&self) -> &SessionMessageLog {
        &self.log
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        self.api.gateway().coordinator()
    }

    pub fn can_send(&self) -> bool {
        self.manager.state().is_open() && self.log.can_send()
    }

    pub fn channel_address(&self) -> Result<Url, SessionError> {
        let mut address = ChannelAddress::new(self.ws_host.clone());
        if let Some(session_id) = &self.session_id {
            address = address.with_session_id(session_id.clone());
        }
        Ok(address.build_url()?)
    }

    pub fn connect(&mut self) -> Result<(), SessionError> {
        let address = self.channel_address()?;
        self.manager.connect(address);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.manager.disconnect();
    }

    /// Waits for the next channel event or logout signal and applies it.
    /// Events that change nothing (duplicates) are skipped. Returns `None`
    /// once the connection manager is gone.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let event = tokio::select! {
                event = self.events.recv() => event?,
                logout = self.logout_rx.recv(), if self.listen_logout => match logout {
                    Ok(reason) => {
                        info!(target: "coursegen::session", ?reason, "logged out; closing channel");
                        self.manager.disconnect();
                        return Some(SessionUpdate::LoggedOut(reason));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        self.listen_logout = false;
                        continue;
                    }
                },
            };
            if let Some(update) = self.handle(event) {
                return Some(update);
            }
        }
    }

    fn handle(&mut self, event: ConnectionEvent) -> Option<SessionUpdate> {
        match event {
            ConnectionEvent::Frame(InboundFrame::Snapshot(snapshot)) => {
                if let Some(session_id) = snapshot.session_id.clone() {
                    self.adopt_session(session_id);
                }
                if snapshot.status == SessionStatus::Done {
                    // Nothing left to stream for a finished course.
                    self.manager.set_should_reconnect(false);
                }
                debug!(
                    target: "coursegen::session",
                    events = snapshot.events.len(),
                    status = snapshot.status.as_str(),
                    reset_count = snapshot.reset_count,
                    "applied session snapshot"
                );
                let session_id = snapshot.session_id.clone();
                self.log.apply(snapshot);
                Some(SessionUpdate::Snapshot { session_id })
            }
            ConnectionEvent::Frame(InboundFrame::Control(signal)) => {
                let changed = self.log.apply_control(&signal);
                if signal == ControlSignal::GenerationDone {
                    info!(target: "coursegen::session", "course generated; closing channel");
                    self.manager.disconnect();
                }
                changed.then(|| SessionUpdate::Status(self.log.status()))
            }
            ConnectionEvent::Frame(InboundFrame::Chat(event)) => {
                if self.log.append(event.clone()) {
                    Some(SessionUpdate::Appended(event))
                } else {
                    debug!(target: "coursegen::session", id = ?event.id, "duplicate event skipped");
                    None
                }
            }
            ConnectionEvent::State(state) => {
                if state.terminal_reason().is_some() {
                    self.log.mark_terminal();
                }
                Some(SessionUpdate::Connection(state))
            }
        }
    }

    /// Reconnects must resume the assigned session, not open a new one.
    fn adopt_session(&mut self, session_id: String) {
        if self.session_id.as_deref() == Some(session_id.as_str()) {
            return;
        }
        info!(target: "coursegen::session", %session_id, "session id assigned");
        self.session_id = Some(session_id);
        match self.channel_address() {
            Ok(address) => self.manager.retarget(address),
            Err(err) => {
                warn!(target: "coursegen::session", error = %err, "cannot address assigned session")
            }
        }
    }

    /// Sends a user chat message, enforcing turn-taking. The message is added
    /// to the local log once it has been handed to the channel.
    pub fn send_chat(&mut self, text: &str) -> Result<SessionEvent, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if !self.manager.state().is_open() {
            return Err(SessionError::NotConnected);
        }
        if !self.log.can_send() {
            return Err(match self.log.status() {
                SessionStatus::Active => SessionError::AwaitingReply,
                status => SessionError::NotAccepting(status),
            });
        }

        let event = SessionEvent::user_chat(text);
        if !self.manager.send(event.to_wire()) {
            return Err(SessionError::NotConnected);
        }
        self.log.append(event.clone());
        Ok(event)
    }

    /// Clears the server-side chat, empties the local log and opens a fresh
    /// channel for the same session.
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        let session_id = self.session_id.clone().ok_or(SessionError::NoSession)?;
        self.api.reset_chat(&session_id).await?;
        self.log.clear();
        info!(target: "coursegen::session", %session_id, "chat reset");

        let address = self.channel_address()?;
        if self.manager.address().as_ref() == Some(&address) {
            self.manager.set_should_reconnect(true);
            self.manager.reconnect();
        } else {
            self.manager.connect(address);
        }
        Ok(())
    }

    /// Loads the session state over HTTP, as the channel would on connect.
    pub async fn resume(&mut self) -> Result<SessionUpdate, SessionError> {
        let session_id = self.session_id.clone().ok_or(SessionError::NoSession)?;
        let snapshot = self.api.session_info(&session_id).await?;
        Ok(self
            .handle(ConnectionEvent::Frame(InboundFrame::Snapshot(snapshot)))
            .unwrap_or(SessionUpdate::Snapshot {
                session_id: Some(session_id),
            }))
    }
}

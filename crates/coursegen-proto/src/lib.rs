//! Wire model for the audit chat channel.
//! Kept in a dedicated crate so the frame shapes can be reused by tooling
//! without pulling in the tokio/reqwest runtime.
//!
//! Every inbound text frame is classified exactly once, here, into
//! [`InboundFrame`]; downstream code matches on the variants instead of
//! probing JSON ad hoc.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Another connection took over the same session.
pub const CLOSE_DUPLICATE_SESSION: u16 = 4000;
/// No valid subscription or credential for this session.
pub const CLOSE_CREDENTIAL_REJECTED: u16 = 4001;

pub const KIND_CHAT: &str = "chat";
pub const KIND_SYSTEM: &str = "system";
pub const KIND_AUDIT_DONE: &str = "audit_done";
pub const KIND_COURSE_CREATED_DONE: &str = "course_created_done";

const FRAME_SESSION_INFO: &str = "session_info";
const FRAME_COURSE_CREATED_START: &str = "course_created_start";
const FRAME_COURSE_GENERATION_DONE: &str = "course_generation_done";
const FRAME_DUPLICATE_CONNECTION: &str = "duplicate_connection";

/// Close conditions after which the channel must not be reopened automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    DuplicateSession,
    CredentialRejected,
}

impl TerminalReason {
    pub fn from_close_code(code: u16) -> Option<Self> {
        match code {
            CLOSE_DUPLICATE_SESSION => Some(TerminalReason::DuplicateSession),
            CLOSE_CREDENTIAL_REJECTED => Some(TerminalReason::CredentialRejected),
            _ => None,
        }
    }

    pub fn close_code(self) -> u16 {
        match self {
            TerminalReason::DuplicateSession => CLOSE_DUPLICATE_SESSION,
            TerminalReason::CredentialRejected => CLOSE_CREDENTIAL_REJECTED,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            TerminalReason::DuplicateSession => "session was opened in another window",
            TerminalReason::CredentialRejected => "no valid subscription for this session",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Author {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "bot")]
    Server,
}

impl Author {
    /// Anything that is not explicitly the user (`bot`, `system`, missing) is
    /// treated as server-authored.
    fn from_wire(who: Option<&str>) -> Self {
        match who {
            Some("user") => Author::User,
            _ => Author::Server,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub id: Option<String>,
    pub who: Author,
    pub kind: String,
    pub payload: String,
}

impl SessionEvent {
    pub fn user_chat(text: impl Into<String>) -> Self {
        Self {
            id: None,
            who: Author::User,
            kind: KIND_CHAT.to_string(),
            payload: text.into(),
        }
    }

    pub fn server_chat(text: impl Into<String>) -> Self {
        Self {
            id: None,
            who: Author::Server,
            kind: KIND_CHAT.to_string(),
            payload: text.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_chat(&self) -> bool {
        self.kind == KIND_CHAT
    }

    pub fn is_server_chat(&self) -> bool {
        self.who == Author::Server && self.is_chat()
    }

    /// Encodes the event in the chat frame shape the server expects.
    pub fn to_wire(&self) -> String {
        #[derive(Serialize)]
        struct WireChat<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            id: Option<&'a str>,
            who: Author,
            #[serde(rename = "type")]
            kind: &'a str,
            text: &'a str,
        }

        let wire = WireChat {
            id: self.id.as_deref(),
            who: self.who,
            kind: &self.kind,
            text: &self.payload,
        };
        // Serializing a struct of strings cannot fail.
        serde_json::to_string(&wire).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Busy,
    Done,
    Terminal,
}

impl SessionStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" | "chatting" => Some(SessionStatus::Active),
            "busy" | "processing" => Some(SessionStatus::Busy),
            "done" => Some(SessionStatus::Done),
            "terminal" => Some(SessionStatus::Terminal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Busy => "busy",
            SessionStatus::Done => "done",
            SessionStatus::Terminal => "terminal",
        }
    }
}

/// Full session state sent on (re)connect and returned by `GET /audit/session-info`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawFrame")]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub events: Vec<SessionEvent>,
    pub status: SessionStatus,
    pub reset_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    ProcessingStarted,
    GenerationDone,
    DuplicateConnection { message: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Snapshot(SessionSnapshot),
    Control(ControlSignal),
    Chat(SessionEvent),
}

/// Classifies one inbound text frame. Never fails: text that is not a JSON
/// object is surfaced as a server chat event carrying the raw text.
pub fn parse_frame(text: &str) -> InboundFrame {
    match serde_json::from_str::<RawFrame>(text) {
        Ok(raw) => raw.classify(text),
        Err(_) => InboundFrame::Chat(SessionEvent::server_chat(text)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    who: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    messages: Option<Vec<Value>>,
    #[serde(default)]
    reset_count: Option<u32>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RawFrame {
    fn classify(self, original: &str) -> InboundFrame {
        match self.kind.as_deref() {
            Some(FRAME_SESSION_INFO) => InboundFrame::Snapshot(self.into()),
            Some(FRAME_COURSE_CREATED_START) => {
                InboundFrame::Control(ControlSignal::ProcessingStarted)
            }
            Some(FRAME_COURSE_GENERATION_DONE) | Some(KIND_COURSE_CREATED_DONE) => {
                InboundFrame::Control(ControlSignal::GenerationDone)
            }
            Some(FRAME_DUPLICATE_CONNECTION) => {
                InboundFrame::Control(ControlSignal::DuplicateConnection {
                    message: self.message,
                })
            }
            _ => InboundFrame::Chat(self.into_event(original)),
        }
    }

    fn into_event(self, original: &str) -> SessionEvent {
        let id = match self.id {
            Some(Value::String(id)) => Some(id),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        SessionEvent {
            id,
            who: Author::from_wire(self.who.as_deref()),
            kind: self.kind.unwrap_or_else(|| KIND_CHAT.to_string()),
            payload: self
                .text
                .or(self.message)
                .unwrap_or_else(|| original.to_string()),
        }
    }
}

impl From<RawFrame> for SessionSnapshot {
    fn from(raw: RawFrame) -> Self {
        let events: Vec<SessionEvent> = raw
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(event_from_value)
            .collect();
        let status = raw
            .status
            .as_deref()
            .and_then(SessionStatus::parse)
            .unwrap_or_else(|| derive_status(&events));
        SessionSnapshot {
            session_id: raw.session_id,
            events,
            status,
            reset_count: raw.reset_count.unwrap_or(0),
        }
    }
}

fn event_from_value(value: Value) -> SessionEvent {
    let original = match &value {
        Value::String(text) => return SessionEvent::server_chat(text.clone()),
        other => other.to_string(),
    };
    match serde_json::from_value::<RawFrame>(value) {
        Ok(raw) => raw.into_event(&original),
        Err(_) => SessionEvent::server_chat(original),
    }
}

fn derive_status(events: &[SessionEvent]) -> SessionStatus {
    match events.last() {
        Some(last)
            if last.kind == KIND_COURSE_CREATED_DONE
                || last.kind == FRAME_COURSE_GENERATION_DONE =>
        {
            SessionStatus::Done
        }
        _ => SessionStatus::Active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_frame_with_id() {
        let frame = parse_frame(r#"{"id":"m1","who":"bot","type":"chat","text":"hello","ts":1.5}"#);
        assert_eq!(
            frame,
            InboundFrame::Chat(SessionEvent::server_chat("hello").with_id("m1"))
        );
    }

    #[test]
    fn unknown_author_is_server() {
        let InboundFrame::Chat(event) =
            parse_frame(r#"{"who":"system","type":"system","text":"audit finished"}"#)
        else {
            panic!("expected chat frame");
        };
        assert_eq!(event.who, Author::Server);
        assert_eq!(event.kind, KIND_SYSTEM);
        assert!(!event.is_server_chat());
    }

    #[test]
    fn malformed_text_becomes_server_chat() {
        assert_eq!(
            parse_frame("not json at all"),
            InboundFrame::Chat(SessionEvent::server_chat("not json at all"))
        );
        assert_eq!(
            parse_frame("[1,2,3]"),
            InboundFrame::Chat(SessionEvent::server_chat("[1,2,3]"))
        );
    }

    #[test]
    fn parses_session_info_snapshot() {
        let frame = parse_frame(
            r#"{"type":"session_info","session_id":"s-1","reset_count":2,
                "messages":[
                    {"who":"user","type":"chat","text":"rust"},
                    {"id":"b1","who":"bot","type":"chat","text":"why?"}
                ]}"#,
        );
        let InboundFrame::Snapshot(snapshot) = frame else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.session_id.as_deref(), Some("s-1"));
        assert_eq!(snapshot.reset_count, 2);
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(
            snapshot.events,
            vec![
                SessionEvent::user_chat("rust"),
                SessionEvent::server_chat("why?").with_id("b1"),
            ]
        );
    }

    #[test]
    fn snapshot_status_prefers_explicit_value() {
        let InboundFrame::Snapshot(snapshot) =
            parse_frame(r#"{"type":"session_info","messages":[],"status":"busy"}"#)
        else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.status, SessionStatus::Busy);
    }

    #[test]
    fn snapshot_ending_in_course_done_is_done() {
        let InboundFrame::Snapshot(snapshot) = parse_frame(
            r#"{"type":"session_info","messages":[
                {"who":"bot","type":"chat","text":"q"},
                {"type":"course_created_done"}
            ]}"#,
        ) else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.status, SessionStatus::Done);
    }

    #[test]
    fn classifies_control_frames() {
        assert_eq!(
            parse_frame(r#"{"type":"course_created_start"}"#),
            InboundFrame::Control(ControlSignal::ProcessingStarted)
        );
        assert_eq!(
            parse_frame(r#"{"type":"course_generation_done"}"#),
            InboundFrame::Control(ControlSignal::GenerationDone)
        );
        assert_eq!(
            parse_frame(r#"{"type":"duplicate_connection","message":"new tab"}"#),
            InboundFrame::Control(ControlSignal::DuplicateConnection {
                message: Some("new tab".into())
            })
        );
    }

    #[test]
    fn terminal_close_codes() {
        assert_eq!(
            TerminalReason::from_close_code(4000),
            Some(TerminalReason::DuplicateSession)
        );
        assert_eq!(
            TerminalReason::from_close_code(4001),
            Some(TerminalReason::CredentialRejected)
        );
        assert_eq!(TerminalReason::from_close_code(CLOSE_ABNORMAL), None);
        assert_eq!(TerminalReason::from_close_code(CLOSE_NORMAL), None);
    }

    #[test]
    fn user_chat_wire_shape() {
        let wire: Value = serde_json::from_str(&SessionEvent::user_chat("hi").to_wire()).unwrap();
        assert_eq!(
            wire,
            serde_json::json!({"who": "user", "type": "chat", "text": "hi"})
        );
    }
}

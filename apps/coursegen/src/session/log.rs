use coursegen_proto::{
    ControlSignal, KIND_AUDIT_DONE, KIND_SYSTEM, SessionEvent, SessionSnapshot, SessionStatus,
};
use std::collections::HashSet;

/// Ordered chat log for one audit session, plus the status that gates
/// whether the user may send.
#[derive(Debug, Clone, Default)]
pub struct SessionMessageLog {
    events: Vec<SessionEvent>,
    seen_ids: HashSet<String>,
    status: SessionStatus,
    reset_count: u32,
}

impl SessionMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the log wholesale; nothing from the previous state survives.
    pub fn apply_snapshot(
        &mut self,
        events: Vec<SessionEvent>,
        status: SessionStatus,
        reset_count: u32,
    ) {
        self.seen_ids = events.iter().filter_map(|event| event.id.clone()).collect();
        self.events = events;
        self.status = status;
        self.reset_count = reset_count;
    }

    pub fn apply(&mut self, snapshot: SessionSnapshot) {
        self.apply_snapshot(snapshot.events, snapshot.status, snapshot.reset_count);
    }

    /// Returns false when the event was already present.
    pub fn append(&mut self, event: SessionEvent) -> bool {
        match &event.id {
            Some(id) => {
                if !self.seen_ids.insert(id.clone()) {
                    return false;
                }
            }
            None => {
                if self.events.last().is_some_and(|last| {
                    last.id.is_none() && last.kind == event.kind && last.payload == event.payload
                }) {
                    return false;
                }
            }
        }
        self.events.push(event);
        true
    }

    /// Returns true when the status changed.
    pub fn apply_control(&mut self, signal: &ControlSignal) -> bool {
        let next = match signal {
            ControlSignal::ProcessingStarted => SessionStatus::Busy,
            ControlSignal::GenerationDone => SessionStatus::Done,
            ControlSignal::DuplicateConnection { .. } => return false,
        };
        if self.status == SessionStatus::Terminal || self.status == next {
            return false;
        }
        self.status = next;
        true
    }

    pub fn mark_terminal(&mut self) {
        self.status = SessionStatus::Terminal;
    }

    /// Empties the log after a chat reset. The reset count is kept until the
    /// server's next snapshot reports the new one.
    pub fn clear(&mut self) {
        self.events.clear();
        self.seen_ids.clear();
        self.status = SessionStatus::Active;
    }

    /// Strict turn-taking: the user may send only into an active session whose
    /// last event is a server chat reply, or into an empty one to start it.
    pub fn can_send(&self) -> bool {
        if self.status != SessionStatus::Active {
            return false;
        }
        if self
            .events
            .iter()
            .any(|event| event.kind == KIND_SYSTEM || event.kind == KIND_AUDIT_DONE)
        {
            return false;
        }
        self.events.last().is_none_or(SessionEvent::is_server_chat)
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn last(&self) -> Option<&SessionEvent> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn reset_count(&self) -> u32 {
        self.reset_count
    }
}

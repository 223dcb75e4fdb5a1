//! Session lifecycle state machine.
//!
//! ```text
//! Uninitialized → Created → Initialized → Active ⇄ Disconnected
//!        any ──────────────────────────────→ Exiting → Closed
//! ```
//!
//! Transitions are pure functions so the host pump can apply them without
//! holding anything across a handler call.

use crate::types::notification::ResponseKind;
use crate::types::request::RequestKind;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Created,
    Initialized,
    Active,
    Disconnected,
    Exiting,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Created => "created",
            SessionState::Initialized => "initialized",
            SessionState::Active => "active",
            SessionState::Disconnected => "disconnected",
            SessionState::Exiting => "exiting",
            SessionState::Closed => "closed",
        }
    }

    /// Whether a request of `kind` may be submitted in this state.
    ///
    /// Only lifecycle violations are rejected here. Calls that reach the
    /// worker too early (e.g. subscribing before `init`) are reported through
    /// their continuation instead.
    pub fn accepts(&self, kind: RequestKind) -> bool {
        match self {
            state if state.is_terminal() => false,
            SessionState::Uninitialized => true,
            _ => kind != RequestKind::CreateSession,
        }
    }

    /// State after a call of `kind` completed successfully.
    pub fn after_call(self, kind: RequestKind) -> SessionState {
        match (self, kind) {
            (_, RequestKind::Exit) => SessionState::Closed,
            (SessionState::Uninitialized, RequestKind::CreateSession) => SessionState::Created,
            (SessionState::Created, RequestKind::Init) => SessionState::Initialized,
            (state, _) => state,
        }
    }

    /// State after the host observed a connection event.
    pub fn after_event(self, kind: ResponseKind) -> SessionState {
        match (self, kind) {
            (
                SessionState::Created
                | SessionState::Initialized
                | SessionState::Active
                | SessionState::Disconnected,
                ResponseKind::FrontConnected,
            ) => SessionState::Active,
            (SessionState::Active | SessionState::Initialized, ResponseKind::FrontDisconnected) => {
                SessionState::Disconnected
            }
            (state, _) => state,
        }
    }

    /// No further calls are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Exiting | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

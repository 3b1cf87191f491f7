//! Per-connection login state

use crate::types::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for a login
    Unauthenticated,
    /// Logged in and listed in the registry
    Present { nickname: String },
    /// Terminal
    Closed,
}

#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Nickname while present
    pub fn nickname(&self) -> Option<&str> {
        match &self.state {
            SessionState::Present { nickname } => Some(nickname),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Unauthenticated -> Present
    pub(crate) fn admit(&mut self, nickname: String) {
        debug_assert_eq!(self.state, SessionState::Unauthenticated);
        self.state = SessionState::Present { nickname };
    }

    /// Any state -> Closed. Returns the previous state.
    pub(crate) fn close(&mut self) -> SessionState {
        std::mem::replace(&mut self.state, SessionState::Closed)
    }
}

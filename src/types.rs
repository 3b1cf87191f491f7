use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Opaque identity of one open WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Ulid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time roster. `version` increases with every registry mutation, so
/// a recipient can tell which of two rosters is newer whatever order they
/// arrive in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub version: u64,
    pub users: Vec<String>,
}

/// An admitted connection and the display name it logged in with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection: ConnectionId,
    pub nickname: String,
}

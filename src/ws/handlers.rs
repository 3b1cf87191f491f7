//! WebSocket message dispatch
//!
//! Each function applies one transition of a connection's [`Session`] and
//! returns the events to emit, in emission order. Nothing is sent from here;
//! the connection loop hands the result to [`Hub::deliver`].
//!
//! [`Hub::deliver`]: crate::broadcast::Hub::deliver

use crate::broadcast::Dispatch;
use crate::error::ConnectionError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

use super::session::{Session, SessionState};

/// Handle a decoded client frame
pub async fn handle_message(
    msg: ClientMessage,
    session: &mut Session,
    state: &AppState,
) -> Vec<Dispatch> {
    match msg {
        ClientMessage::Login { nickname } => handle_login(session, state, nickname).await,
        ClientMessage::Message { text } => handle_chat(session, text),
        ClientMessage::Unknown => {
            tracing::debug!(connection = %session.id(), "Ignoring frame of unknown type");
            Vec::new()
        }
    }
}

/// A frame that could not be decoded. The connection stays open.
pub fn handle_malformed(session: &Session, error: &ConnectionError) -> Vec<Dispatch> {
    tracing::warn!(connection = %session.id(), "Dropping frame: {}", error);
    vec![Dispatch::Unicast(ServerMessage::malformed())]
}

/// The connection is gone. Announces the departure only if it had logged in.
pub async fn handle_close(session: &mut Session, state: &AppState) -> Vec<Dispatch> {
    if let SessionState::Closed = session.close() {
        return Vec::new();
    }

    match state.registry.evict(session.id()).await {
        Some(nickname) => {
            tracing::info!(connection = %session.id(), nickname, "User left");
            vec![
                Dispatch::Broadcast(ServerMessage::left(&nickname)),
                roster(state).await,
            ]
        }
        None => {
            tracing::info!(connection = %session.id(), "Connection closed before login");
            Vec::new()
        }
    }
}

async fn handle_login(
    session: &mut Session,
    state: &AppState,
    nickname: Option<String>,
) -> Vec<Dispatch> {
    if *session.state() != SessionState::Unauthenticated {
        tracing::info!(connection = %session.id(), "Ignoring login on a logged-in connection");
        return Vec::new();
    }

    match state.registry.admit(session.id(), nickname.as_deref()).await {
        Ok(nickname) => {
            tracing::info!(connection = %session.id(), nickname, "User joined");
            let dispatches = vec![
                Dispatch::Unicast(ServerMessage::welcome(&nickname)),
                Dispatch::Broadcast(ServerMessage::joined(&nickname)),
                roster(state).await,
            ];
            session.admit(nickname);
            dispatches
        }
        Err(e) => {
            tracing::info!(connection = %session.id(), requested = ?nickname, "Login rejected: {}", e);
            session.close();
            vec![
                Dispatch::Unicast(ServerMessage::LoginError {
                    message: e.to_string(),
                }),
                Dispatch::Close,
            ]
        }
    }
}

fn handle_chat(session: &Session, text: Option<String>) -> Vec<Dispatch> {
    let Some(nickname) = session.nickname() else {
        tracing::debug!(connection = %session.id(), "Ignoring message from a connection that is not logged in");
        return Vec::new();
    };

    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        return Vec::new();
    };

    tracing::debug!(connection = %session.id(), nickname, "Chat message: {}", text);
    vec![Dispatch::Broadcast(ServerMessage::Chat {
        nickname: nickname.to_string(),
        message: text,
    })]
}

async fn roster(state: &AppState) -> Dispatch {
    Dispatch::Roster(state.registry.roster().await)
}

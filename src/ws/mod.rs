pub mod handlers;
pub mod session;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::sync::Arc;
use std::time::Duration;
use crate::broadcast::{Flow, Mailbox, Outbound};
use crate::error::ConnectionError;
use crate::protocol::{self, ServerMessage};
use crate::state::AppState;
use crate::types::ConnectionId;
use session::Session;

/// Upgrade an HTTP request into a chat connection
pub fn upgrade(ws: WebSocketUpgrade, state: Arc<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

/// Drive one connection from accept to close
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let id = ConnectionId::new();
    let (sink, mut stream) = socket.split();
    let (peer, mailbox) = state.hub.register(id).await;

    tracing::info!(connection = %id, "WebSocket connected");

    let mut writer = tokio::spawn(writer_task(sink, mailbox, state.config.send_timeout));
    let mut writer_done = false;
    let mut session = Session::new(id);

    let outcome: Result<(), ConnectionError> = loop {
        tokio::select! {
            reason = peer.terminated() => break Err(reason),

            result = &mut writer, if !writer_done => {
                writer_done = true;
                break match result {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(connection = %id, "Writer task failed: {}", e);
                        Err(ConnectionError::SendFailure)
                    }
                };
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!(connection = %id, "Received message: {}", text.as_str());

                    let dispatches = match protocol::decode(text.as_str()) {
                        Ok(msg) => handlers::handle_message(msg, &mut session, &state).await,
                        Err(e) => handlers::handle_malformed(&session, &e),
                    };

                    match state.hub.deliver(&peer, dispatches).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                Some(Ok(Message::Pong(_))) => peer.mark_alive(),
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = peer.send(Outbound::Pong(data)).await {
                        break Err(e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(connection = %id, reason = ?frame, "Client initiated close");
                    break Ok(());
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(connection = %id, "Ignoring binary frame");
                }
                Some(Err(e)) => break Err(ConnectionError::Transport(e)),
                None => break Ok(()),
            }
        }
    };

    match &outcome {
        Ok(()) => tracing::info!(connection = %id, "WebSocket closed"),
        Err(ConnectionError::Shutdown) => {
            tracing::info!(connection = %id, "WebSocket closed for shutdown")
        }
        Err(e) => tracing::warn!(connection = %id, "WebSocket closed: {}", e),
    }

    state.hub.unregister(id).await;
    let departure = handlers::handle_close(&mut session, &state).await;
    state.hub.publish(departure).await;

    // Let the writer flush what is already queued (e.g. a login_error and
    // its close frame) unless the peer is known to be dead.
    drop(peer);
    if !writer_done {
        let unresponsive = matches!(outcome, Err(ConnectionError::Unresponsive));
        if unresponsive
            || tokio::time::timeout(state.config.send_timeout, &mut writer)
                .await
                .is_err()
        {
            writer.abort();
        }
    }
}

/// Owns the socket's sending half and drains the connection's outbound queue
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut mailbox: Mailbox,
    send_timeout: Duration,
) -> Result<(), ConnectionError> {
    while let Some(item) = mailbox.recv().await {
        let (msg, closing) = match item {
            Outbound::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => (Message::Text(json.into()), false),
                Err(e) => {
                    tracing::error!("Failed to serialize outbound event: {}", e);
                    continue;
                }
            },
            Outbound::Roster(roster) => match serde_json::to_string(&ServerMessage::from(roster)) {
                Ok(json) => (Message::Text(json.into()), false),
                Err(e) => {
                    tracing::error!("Failed to serialize roster: {}", e);
                    continue;
                }
            },
            Outbound::Ping => (Message::Ping(Default::default()), false),
            Outbound::Pong(data) => (Message::Pong(data), false),
            Outbound::Close => (Message::Close(None), true),
        };

        match tokio::time::timeout(send_timeout, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ConnectionError::Transport(e)),
            Err(_) => return Err(ConnectionError::SendFailure),
        }

        if closing {
            break;
        }
    }
    Ok(())
}

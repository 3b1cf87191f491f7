use retrochat::broadcast::{Flow, Mailbox, Outbound, Peer};
use retrochat::config::Config;
use retrochat::protocol::{self, ClientMessage, ServerMessage};
use retrochat::state::AppState;
use retrochat::types::ConnectionId;
use retrochat::ws::handlers::{handle_close, handle_message};
use retrochat::ws::session::Session;
use std::sync::Arc;

/// A connection without a socket: a session plus the receiving end of its queue
struct Client {
    session: Session,
    peer: Peer,
    rx: Mailbox,
}

impl Client {
    async fn connect(state: &AppState) -> Self {
        let id = ConnectionId::new();
        let (peer, rx) = state.hub.register(id).await;
        Self {
            session: Session::new(id),
            peer,
            rx,
        }
    }

    /// Feed a raw text frame through decode, dispatch and delivery
    async fn send(&mut self, state: &AppState, raw: &str) -> Flow {
        let dispatches = match protocol::decode(raw) {
            Ok(msg) => handle_message(msg, &mut self.session, state).await,
            Err(e) => retrochat::ws::handlers::handle_malformed(&self.session, &e),
        };
        state.hub.deliver(&self.peer, dispatches).await.unwrap()
    }

    async fn disconnect(mut self, state: &AppState) {
        state.hub.unregister(self.session.id()).await;
        let dispatches = handle_close(&mut self.session, state).await;
        state.hub.publish(dispatches).await;
    }

    fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Some(item) = self.rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn events(&mut self) -> Vec<ServerMessage> {
        self.drain()
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Event(msg) => Some(msg),
                Outbound::Roster(roster) => Some(ServerMessage::from(roster)),
                _ => None,
            })
            .collect()
    }
}

fn userlist(names: &[&str]) -> ServerMessage {
    ServerMessage::Userlist {
        users: names.iter().map(|n| n.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_login_then_chat_then_leave() {
    let state = AppState::default();
    let mut alice = Client::connect(&state).await;
    let mut bob = Client::connect(&state).await;

    // Alice logs in
    let flow = alice
        .send(&state, r#"{"type":"login","nickname":"Alice"}"#)
        .await;
    assert_eq!(flow, Flow::Continue);
    assert_eq!(
        alice.events(),
        vec![
            ServerMessage::welcome("Alice"),
            ServerMessage::joined("Alice"),
            userlist(&["Alice"]),
        ]
    );
    // Bob has not logged in yet but still sees the room
    assert_eq!(
        bob.events(),
        vec![ServerMessage::joined("Alice"), userlist(&["Alice"])]
    );

    // Bob logs in
    bob.send(&state, r#"{"type":"login","nickname":"Bob"}"#)
        .await;
    assert_eq!(
        bob.events(),
        vec![
            ServerMessage::welcome("Bob"),
            ServerMessage::joined("Bob"),
            userlist(&["Alice", "Bob"]),
        ]
    );
    assert_eq!(
        alice.events(),
        vec![ServerMessage::joined("Bob"), userlist(&["Alice", "Bob"])]
    );

    // Chat is delivered verbatim to everyone, sender included
    alice
        .send(&state, r#"{"type":"message","text":"<i>hello</i> "}"#)
        .await;
    let expected = ServerMessage::Chat {
        nickname: "Alice".to_string(),
        message: "<i>hello</i> ".to_string(),
    };
    assert_eq!(alice.events(), vec![expected.clone()]);
    assert_eq!(bob.events(), vec![expected]);

    // Alice leaves
    alice.disconnect(&state).await;
    assert_eq!(
        bob.events(),
        vec![ServerMessage::left("Alice"), userlist(&["Bob"])]
    );
    assert_eq!(state.registry.snapshot_names().await, vec!["Bob"]);
}

#[tokio::test]
async fn test_duplicate_nickname_is_rejected_and_closed() {
    let state = AppState::default();
    let mut alice = Client::connect(&state).await;
    let mut impostor = Client::connect(&state).await;

    alice
        .send(&state, r#"{"type":"login","nickname":"Alice"}"#)
        .await;
    alice.drain();
    impostor.drain();

    let flow = impostor
        .send(&state, r#"{"type":"login","nickname":"Alice"}"#)
        .await;
    assert_eq!(flow, Flow::Close);

    let out = impostor.drain();
    assert_eq!(out.len(), 2);
    match &out[0] {
        Outbound::Event(ServerMessage::LoginError { message }) => {
            assert!(message.contains("Alice"));
            assert!(message.contains("已被使用"));
        }
        other => panic!("Expected login_error, got {:?}", other),
    }
    assert_eq!(out[1], Outbound::Close);

    // Nobody else hears about the rejected attempt
    assert!(alice.drain().is_empty());
    assert_eq!(state.registry.snapshot_names().await, vec!["Alice"]);

    // Closing the rejected connection produces no traffic
    impostor.disconnect(&state).await;
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn test_short_nickname_is_rejected() {
    let state = AppState::default();
    let mut client = Client::connect(&state).await;

    let flow = client
        .send(&state, r#"{"type":"login","nickname":"  Z  "}"#)
        .await;
    assert_eq!(flow, Flow::Close);
    assert!(matches!(
        client.events().as_slice(),
        [ServerMessage::LoginError { .. }]
    ));
    assert!(state.registry.is_empty().await);
}

#[tokio::test]
async fn test_blank_messages_produce_no_chat() {
    let state = AppState::default();
    let mut alice = Client::connect(&state).await;
    alice
        .send(&state, r#"{"type":"login","nickname":"Alice"}"#)
        .await;
    alice.drain();

    alice
        .send(&state, r#"{"type":"message","text":"   "}"#)
        .await;
    alice.send(&state, r#"{"type":"message","text":""}"#).await;
    alice.send(&state, r#"{"type":"message"}"#).await;

    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn test_malformed_and_unknown_frames_keep_connection_open() {
    let state = AppState::default();
    let mut client = Client::connect(&state).await;

    assert_eq!(client.send(&state, "{not json").await, Flow::Continue);
    assert_eq!(client.events(), vec![ServerMessage::malformed()]);

    assert_eq!(
        client.send(&state, r#"{"type":"typing"}"#).await,
        Flow::Continue
    );
    assert!(client.drain().is_empty());

    // Still able to log in afterwards
    client
        .send(&state, r#"{"type":"login","nickname":"Alice"}"#)
        .await;
    assert_eq!(client.events().len(), 3);
}

#[tokio::test]
async fn test_roster_tracks_present_connections() {
    let state = AppState::default();
    let mut clients = Vec::new();

    for name in ["Alice", "Bob", "Carol", "Dave"] {
        let mut client = Client::connect(&state).await;
        let frame = serde_json::to_string(&ClientMessage::Login {
            nickname: Some(name.to_string()),
        })
        .unwrap();
        client.send(&state, &frame).await;
        clients.push(client);
    }
    assert_eq!(state.registry.len().await, 4);

    let bob = clients.remove(1);
    bob.disconnect(&state).await;
    assert_eq!(
        state.registry.snapshot_names().await,
        vec!["Alice", "Carol", "Dave"]
    );

    let last = clients.last_mut().unwrap();
    let events = last.events();
    assert_eq!(events.last(), Some(&userlist(&["Alice", "Carol", "Dave"])));
}

#[tokio::test]
async fn test_last_participant_leaving_empties_roster() {
    let state = AppState::default();
    let mut alice = Client::connect(&state).await;
    let mut watcher = Client::connect(&state).await;

    alice
        .send(&state, r#"{"type":"login","nickname":"Alice"}"#)
        .await;
    watcher.drain();

    alice.disconnect(&state).await;
    assert_eq!(
        watcher.events(),
        vec![ServerMessage::left("Alice"), userlist(&[])]
    );
}

fn last_userlist(events: &[ServerMessage]) -> Option<Vec<String>> {
    events.iter().rev().find_map(|event| match event {
        ServerMessage::Userlist { users } => Some(users.clone()),
        _ => None,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_presence_changes_leave_final_roster_current() {
    let state = Arc::new(AppState::new(Config {
        outbound_queue: 256,
        ..Config::default()
    }));
    let mut watcher = Client::connect(&state).await;

    for round in 0..20 {
        let joins: Vec<_> = (0..32)
            .map(|i| {
                let state = state.clone();
                tokio::spawn(async move {
                    let mut client = Client::connect(&state).await;
                    let frame = format!(r#"{{"type":"login","nickname":"user{}-{}"}}"#, round, i);
                    client.send(&state, &frame).await;
                    client
                })
            })
            .collect();

        let mut clients = Vec::new();
        for join in joins {
            clients.push(join.await.unwrap());
        }

        let expected = state.registry.snapshot_names().await;
        assert_eq!(expected.len(), 32);
        assert_eq!(
            last_userlist(&watcher.events()),
            Some(expected),
            "stale roster after concurrent logins in round {}",
            round
        );

        let leaves: Vec<_> = clients
            .into_iter()
            .map(|client| {
                let state = state.clone();
                tokio::spawn(async move { client.disconnect(&state).await })
            })
            .collect();
        for leave in leaves {
            leave.await.unwrap();
        }

        assert!(state.registry.is_empty().await);
        assert_eq!(
            last_userlist(&watcher.events()),
            Some(Vec::new()),
            "stale roster after concurrent departures in round {}",
            round
        );
    }
}

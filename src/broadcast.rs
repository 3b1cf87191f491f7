//! Fan-out to open connections and the liveness sweep

use crate::error::ConnectionError;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::{ConnectionId, Roster};
use axum::body::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;

/// Items queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerMessage),
    /// Sent on the wire as a `userlist` event
    Roster(Roster),
    Ping,
    Pong(Bytes),
    Close,
}

/// Where an event produced by the dispatcher should go
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Only to the connection whose frame triggered it
    Unicast(ServerMessage),
    /// To every open connection
    Broadcast(ServerMessage),
    /// The refreshed roster, to every open connection
    Roster(Roster),
    /// Close the triggering connection after everything queued before it
    Close,
}

/// What the connection loop does after delivering dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Handle to one open connection, shared between its own task and the hub
#[derive(Debug, Clone)]
pub struct Peer {
    tx: mpsc::Sender<Outbound>,
    alive: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    terminate: Arc<Notify>,
}

impl Peer {
    /// Queue an item, waiting for room if the writer is behind
    pub async fn send(&self, item: Outbound) -> Result<(), ConnectionError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| ConnectionError::SendFailure)
    }

    /// Record a liveness probe answer
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Resolves once the hub decides this connection must be dropped, with
    /// the reason it was dropped
    pub async fn terminated(&self) -> ConnectionError {
        self.terminate.notified().await;
        if self.shutdown.load(Ordering::SeqCst) {
            ConnectionError::Shutdown
        } else {
            ConnectionError::Unresponsive
        }
    }
}

/// Receiving end of a connection's outbound queue.
///
/// Rosters produced by concurrent joins and leaves can be queued out of
/// order; a roster older than one already handed out is dropped, so the last
/// `userlist` a client sees always matches the registry.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Outbound>,
    roster_version: Option<u64>,
}

impl Mailbox {
    pub async fn recv(&mut self) -> Option<Outbound> {
        loop {
            let item = self.rx.recv().await?;
            if self.is_current(&item) {
                return Some(item);
            }
        }
    }

    /// Next item if one is already queued
    pub fn try_recv(&mut self) -> Option<Outbound> {
        loop {
            let item = self.rx.try_recv().ok()?;
            if self.is_current(&item) {
                return Some(item);
            }
        }
    }

    fn is_current(&mut self, item: &Outbound) -> bool {
        let Outbound::Roster(roster) = item else {
            return true;
        };
        if self.roster_version.is_some_and(|seen| roster.version <= seen) {
            tracing::debug!(version = roster.version, "Dropping stale roster");
            return false;
        }
        self.roster_version = Some(roster.version);
        true
    }
}

/// The set of open connections, as maintained by the transport layer.
#[derive(Debug)]
pub struct Hub {
    peers: RwLock<HashMap<ConnectionId, Peer>>,
    queue_capacity: usize,
}

impl Hub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Track a newly accepted connection and create its outbound queue
    pub async fn register(&self, id: ConnectionId) -> (Peer, Mailbox) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let peer = Peer {
            tx,
            alive: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(AtomicBool::new(false)),
            terminate: Arc::new(Notify::new()),
        };
        self.peers.write().await.insert(id, peer.clone());
        (
            peer,
            Mailbox {
                rx,
                roster_version: None,
            },
        )
    }

    pub async fn unregister(&self, id: ConnectionId) {
        self.peers.write().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Fan an event out to every open connection without waiting on any of them.
    /// Returns how many queues accepted it.
    pub async fn broadcast(&self, msg: &ServerMessage) -> usize {
        self.fan_out(Outbound::Event(msg.clone())).await
    }

    pub async fn broadcast_roster(&self, roster: &Roster) -> usize {
        self.fan_out(Outbound::Roster(roster.clone())).await
    }

    /// Route dispatcher output for the connection that produced it
    pub async fn deliver(
        &self,
        from: &Peer,
        dispatches: Vec<Dispatch>,
    ) -> Result<Flow, ConnectionError> {
        let mut flow = Flow::Continue;
        for dispatch in dispatches {
            match dispatch {
                Dispatch::Unicast(msg) => from.send(Outbound::Event(msg)).await?,
                Dispatch::Broadcast(msg) => {
                    self.broadcast(&msg).await;
                }
                Dispatch::Roster(roster) => {
                    self.broadcast_roster(&roster).await;
                }
                Dispatch::Close => {
                    from.send(Outbound::Close).await?;
                    flow = Flow::Close;
                }
            }
        }
        Ok(flow)
    }

    /// Fan out the broadcast part of dispatches that no longer have a
    /// connection to answer to (departures)
    pub async fn publish(&self, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            match dispatch {
                Dispatch::Broadcast(msg) => {
                    self.broadcast(&msg).await;
                }
                Dispatch::Roster(roster) => {
                    self.broadcast_roster(&roster).await;
                }
                Dispatch::Unicast(_) | Dispatch::Close => {}
            }
        }
    }

    /// One liveness round: terminate connections that never answered the
    /// previous probe, probe the rest. Returns the number terminated.
    pub async fn sweep(&self) -> usize {
        let peers = self.snapshot().await;

        let mut terminated = 0;
        for (id, peer) in peers {
            if !peer.alive.swap(false, Ordering::SeqCst) {
                tracing::warn!(connection = %id, "No answer to liveness probe, terminating");
                peer.terminate.notify_one();
                terminated += 1;
                continue;
            }

            if let Err(mpsc::error::TrySendError::Full(_)) = peer.tx.try_send(Outbound::Ping) {
                // Not probed this round, so nothing to answer yet
                peer.alive.store(true, Ordering::SeqCst);
                tracing::debug!(connection = %id, "Outbound queue full, probe skipped");
            }
        }
        terminated
    }

    /// Terminate every open connection (used on shutdown)
    pub async fn close_all(&self) {
        for (_, peer) in self.snapshot().await {
            peer.shutdown.store(true, Ordering::SeqCst);
            peer.terminate.notify_one();
        }
    }

    async fn fan_out(&self, item: Outbound) -> usize {
        let peers = self.snapshot().await;

        let mut delivered = 0;
        for (id, peer) in peers {
            match peer.tx.try_send(item.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(connection = %id, "Outbound queue full, skipping slow recipient");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Writer is gone; the connection's own task handles the close
                    tracing::debug!(connection = %id, "Recipient already closing");
                }
            }
        }
        delivered
    }

    /// Copy of the open set, so no lock is held while sending
    async fn snapshot(&self) -> Vec<(ConnectionId, Peer)> {
        self.peers
            .read()
            .await
            .iter()
            .map(|(id, peer)| (*id, peer.clone()))
            .collect()
    }
}

/// Spawn the periodic liveness sweep. Abort the handle to stop it.
pub fn spawn_liveness_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let period = state.config.ping_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let terminated = state.hub.sweep().await;
            if terminated > 0 {
                tracing::info!(terminated, "Liveness sweep terminated connections");
            }
        }
    })
}

//! Real-time location relay.
//!
//! Every live connection owns a bounded outbound queue drained by its own
//! writer task, so a broadcast only ever enqueues and never waits on a peer.
//! The registry is a concurrent map; a broadcast iterates over a snapshot
//! taken without holding any lock during delivery.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::PositionUpdate;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Error)]
pub enum PeerDeliveryFailure {
    #[error("outbound queue of {0} is full")]
    QueueFull(ConnectionId),

    #[error("outbound queue of {0} is closed")]
    QueueClosed(ConnectionId),
}

/// One live relay endpoint.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Open);
        Self { id, tx, state }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch the state; writers use it to stop once the connection leaves `Open`.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// `Open -> Closing`. Returns false if the connection was already leaving.
    fn begin_close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Open {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        })
    }

    /// Terminal transition, called by the writer once its queue is drained or abandoned.
    pub fn mark_closed(&self) {
        self.state.send_replace(ConnectionState::Closed);
    }

    fn try_deliver(&self, message: Arc<str>) -> Result<(), PeerDeliveryFailure> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PeerDeliveryFailure::QueueFull(self.id.clone()),
            mpsc::error::TrySendError::Closed(_) => {
                PeerDeliveryFailure::QueueClosed(self.id.clone())
            }
        })
    }
}

/// Handed to the transport on connect: the connection plus its outbound queue.
pub struct ConnectionHandle {
    pub connection: Arc<Connection>,
    pub outbound: mpsc::Receiver<Arc<str>>,
}

/// Who is currently reachable. Only `Open` connections are ever present.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connections.insert(connection.id.clone(), connection)
    }

    fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes `connection` only if the entry under its id is that same connection.
    fn remove_exact(&self, connection: &Arc<Connection>) -> bool {
        self.connections
            .remove_if(&connection.id, |_, current| Arc::ptr_eq(current, connection))
            .is_some()
    }

    /// Copy of every registered connection except `excluded`.
    fn snapshot_excluding(&self, excluded: &ConnectionId) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.key() != excluded)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn drain(&self) -> Vec<Arc<Connection>> {
        let all: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for connection in &all {
            self.remove_exact(connection);
        }
        all
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

pub struct LocationRelay {
    registry: ConnectionRegistry,
    queue_capacity: usize,
}

impl LocationRelay {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Registers a new `Open` connection, eligible for the next broadcast.
    pub fn on_connect(&self, id: ConnectionId) -> ConnectionHandle {
        let (tx, outbound) = mpsc::channel(self.queue_capacity);
        let connection = Arc::new(Connection::new(id, tx));

        if let Some(previous) = self.registry.insert(Arc::clone(&connection)) {
            warn!(conn_id = %previous.id, "Connection id reused, closing previous connection");
            previous.begin_close();
        }

        info!(
            conn_id = %connection.id,
            live = self.registry.len(),
            "📍 Location client connected"
        );
        ConnectionHandle {
            connection,
            outbound,
        }
    }

    /// Validates an inbound payload and relays it to every other open connection.
    ///
    /// Returns how many peers the update was enqueued for. Malformed payloads
    /// are logged and dropped; the sender stays connected.
    pub fn on_message(&self, sender: &ConnectionId, payload: &str) -> usize {
        let update = match PositionUpdate::parse(payload) {
            Ok(update) => update,
            Err(e) => {
                warn!(conn_id = %sender, error = %e, "Dropping malformed position payload");
                return 0;
            }
        };

        if !self.registry.get(sender).is_some_and(|c| c.is_open()) {
            debug!(conn_id = %sender, "Ignoring update from a connection that is not open");
            return 0;
        }

        let message: Arc<str> = match serde_json::to_string(&update.with_sender(sender.as_str())) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(conn_id = %sender, error = %e, "Failed to serialize position update");
                return 0;
            }
        };

        let peers = self.registry.snapshot_excluding(sender);
        self.deliver(&peers, message)
    }

    /// Enqueues `message` on each peer still open; failing peers are disconnected.
    fn deliver(&self, peers: &[Arc<Connection>], message: Arc<str>) -> usize {
        let mut delivered = 0;
        for peer in peers {
            if !peer.is_open() {
                continue;
            }
            match peer.try_deliver(Arc::clone(&message)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(conn_id = %peer.id, error = %e, "Peer delivery failed, disconnecting");
                    self.close(peer);
                }
            }
        }
        debug!(recipients = peers.len(), delivered, "Position update relayed");
        delivered
    }

    /// Moves the connection to `Closing` and removes it from the registry.
    pub fn on_disconnect(&self, id: &ConnectionId) -> bool {
        match self.registry.get(id) {
            Some(connection) => self.close(&connection),
            None => false,
        }
    }

    /// Closes exactly this connection. A newer connection registered under the
    /// same id is left alone.
    pub fn close(&self, connection: &Arc<Connection>) -> bool {
        connection.begin_close();
        let removed = self.registry.remove_exact(connection);
        if removed {
            info!(
                conn_id = %connection.id,
                live = self.registry.len(),
                "📴 Location client disconnected"
            );
        }
        removed
    }

    /// Closes every live connection. Returns how many were open.
    pub fn shutdown(&self) -> usize {
        let connections = self.registry.drain();
        for connection in &connections {
            connection.begin_close();
        }
        if !connections.is_empty() {
            info!(count = connections.len(), "🛑 Location relay closed all connections");
        }
        connections.len()
    }
}

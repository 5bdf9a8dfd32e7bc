//! Shared registry of connected clients.
//!
//! All mutations (add, remove, identity assignment) take the write half of a
//! single `RwLock`; every read that feeds a delivery decision holds the read
//! half for its whole scan, so a fan-out never observes the set changing
//! underneath it.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{Level, debug};

use super::connection::ClientConnection;

/// One registry entry: a connection plus its optional identity.
pub struct Client {
    /// The connection this client is reachable through.
    pub connection: Arc<ClientConnection>,
    user_id: Option<String>,
}

impl Client {
    fn new(connection: Arc<ClientConnection>) -> Self {
        Self {
            connection,
            user_id: None,
        }
    }

    /// The registered `userID`, if one has been assigned.
    ///
    /// An empty `userID` counts as unassigned.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Whether this client has completed registration.
    pub fn is_registered(&self) -> bool {
        self.user_id().is_some()
    }

    /// Diagnostic label, e.g. `alice (10.0.0.4:51234)`.
    pub fn display(&self) -> String {
        let name = self.user_id().unwrap_or("<unregistered>");
        format!("{name} ({})", self.connection.peer)
    }
}

/// Outcome of [`ClientRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The `userID` was stored.
    Registered,
    /// The client already carries a `userID`; nothing changed.
    AlreadyRegistered,
    /// No client with that connection ID is in the registry.
    UnknownConnection,
}

impl Registration {
    /// Whether the registration took effect.
    pub fn succeeded(self) -> bool {
        self == Self::Registered
    }
}

/// Ordered collection of connected clients, shared by every session.
pub struct ClientRegistry {
    clients: RwLock<Vec<Client>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
        }
    }

    /// Append a connection with no identity.
    ///
    /// A connection whose ID is already present replaces the old entry.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut clients = self.clients.write().await;
        match clients.iter_mut().find(|c| c.connection.id == connection.id) {
            Some(existing) => *existing = Client::new(connection),
            None => clients.push(Client::new(connection)),
        }
    }

    /// Remove a connection by ID. Returns whether an entry was removed.
    pub async fn remove(&self, connection_id: &str) -> bool {
        let mut clients = self.clients.write().await;
        let before = clients.len();
        clients.retain(|c| c.connection.id != connection_id);
        before != clients.len()
    }

    /// Assign a `userID` to a connection, at most once.
    pub async fn register(&self, connection_id: &str, user_id: String) -> Registration {
        let mut clients = self.clients.write().await;
        let Some(client) = clients
            .iter_mut()
            .find(|c| c.connection.id == connection_id)
        else {
            return Registration::UnknownConnection;
        };
        if let Some(existing) = client.user_id() {
            debug!(conn_id = connection_id, user_id = existing, "client already registered");
            return Registration::AlreadyRegistered;
        }
        client.user_id = Some(user_id);
        Registration::Registered
    }

    /// The `userID` bound to a connection, if any.
    pub async fn user_id(&self, connection_id: &str) -> Option<String> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .find(|c| c.connection.id == connection_id)
            .and_then(|c| c.user_id().map(str::to_owned))
    }

    /// Whether a connection has completed registration.
    pub async fn is_registered(&self, connection_id: &str) -> bool {
        let clients = self.clients.read().await;
        clients
            .iter()
            .any(|c| c.connection.id == connection_id && c.is_registered())
    }

    /// Visit clients in registry order while holding the read lock.
    ///
    /// The visitor returns [`ControlFlow::Break`] to stop early.
    pub async fn scan<F>(&self, mut visit: F)
    where
        F: FnMut(&Client) -> ControlFlow<()>,
    {
        let clients = self.clients.read().await;
        for client in clients.iter() {
            if visit(client).is_break() {
                break;
            }
        }
    }

    /// Display strings for every client, in registry order.
    ///
    /// Diagnostic only: the listing may be stale as soon as it is returned.
    pub async fn snapshot(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        clients.iter().map(Client::display).collect()
    }

    /// Log the client listing at debug level.
    pub async fn trace_snapshot(&self) {
        if tracing::enabled!(Level::DEBUG) {
            let clients = self.snapshot().await;
            debug!(?clients, "connected clients");
        }
    }

    /// Number of connected clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether no clients are connected.
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Number of clients that have registered a `userID`.
    pub async fn registered_count(&self) -> usize {
        let clients = self.clients.read().await;
        clients.iter().filter(|c| c.is_registered()).count()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

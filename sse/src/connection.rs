use axum::response::sse::Event;
use dashmap::DashMap;
use log::*;
use std::convert::Infallible;
use tokio::sync::mpsc::UnboundedSender;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
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

/// Registry of live SSE connections, keyed by connection ID for O(1)
/// registration, cleanup and sends.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, UnboundedSender<Result<Event, Infallible>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a new connection - O(1)
    pub fn register(&self, sender: UnboundedSender<Result<Event, Infallible>>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.connections.insert(connection_id.clone(), sender);
        connection_id
    }

    /// Unregister a connection - O(1)
    pub fn unregister(&self, connection_id: &ConnectionId) {
        let _ = self.connections.remove(connection_id);
    }

    /// Send an event to one connection. Returns `false` when the connection
    /// is unknown or its channel is closed; the caller decides whether that
    /// is worth escalating.
    pub fn send_to_connection(&self, connection_id: &ConnectionId, event: Event) -> bool {
        match self.connections.get(connection_id) {
            Some(sender) => match sender.send(Ok(event)) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "Failed to send event to connection {}: {}. Connection will be cleaned up.",
                        connection_id.as_str(),
                        e
                    );
                    false
                }
            },
            None => false,
        }
    }

    /// Number of currently registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::message::{Event as SseEvent, EventType};
use axum::response::sse::Event;
use log::*;
use std::convert::Infallible;
use std::sync::Arc;

pub struct Manager {
    registry: Arc<ConnectionRegistry>,
}

impl Manager {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Register a new connection and return its unique ID
    pub fn register_connection(
        &self,
        sender: tokio::sync::mpsc::UnboundedSender<Result<Event, Infallible>>,
    ) -> ConnectionId {
        let connection_id = self.registry.register(sender);
        info!("Registered new SSE connection");
        connection_id
    }

    /// Unregister a connection by ID
    pub fn unregister_connection(&self, connection_id: &ConnectionId) {
        info!("Unregistering SSE connection");
        self.registry.unregister(connection_id);
    }

    /// Send an event to a single connection. Returns `false` when the
    /// connection is gone or its channel is closed.
    pub fn send_to_connection(&self, connection_id: &ConnectionId, message: SseEvent) -> bool {
        let event_type = message.event_type();

        let event_data = match message.data() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize SSE event: {e}");
                return false;
            }
        };

        let event = Event::default().event(event_type).data(event_data);
        self.registry.send_to_connection(connection_id, event)
    }

    /// Number of currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

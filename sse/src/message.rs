use serde_json::Value;

/// Trait for getting the SSE event type name
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// Events pushed to connected clients.
///
/// The event name carries the method (`context_set` / `message_received`)
/// and the data field carries only the value itself, so clients do not need
/// to unwrap an envelope.
#[derive(Debug, Clone)]
pub enum Event {
    /// Sent once per connection after joining: the full ordered context log.
    ContextSet { context: Value },
    /// Sent per relay event while connected: the raw message payload.
    /// The broker channel is routing metadata and is not forwarded.
    MessageReceived { payload: String },
}

impl Event {
    /// Serialize the event's data for the SSE `data:` field.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            Event::ContextSet { context } => serde_json::to_string(context),
            Event::MessageReceived { payload } => serde_json::to_string(payload),
        }
    }
}

impl EventType for Event {
    fn event_type(&self) -> &'static str {
        match self {
            Event::ContextSet { .. } => "context_set",
            Event::MessageReceived { .. } => "message_received",
        }
    }
}

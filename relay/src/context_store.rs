use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::Id;
use serde::{Deserialize, Serialize};

/// One delivered payload and the broker channel it arrived on, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// The append-only log of payloads delivered for a session, replayed to
/// newly joined connections. Serializes transparently as the bare ordered
/// log, so the `context_set` event carries the array itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionContext {
    entries: Vec<ContextEntry>,
}

impl SessionContext {
    /// Seed a context with the first delivered payload. The first entry has
    /// no channel: it records only what seeded the session.
    pub fn new(first_payload: String) -> Self {
        Self {
            entries: vec![ContextEntry {
                payload: first_payload,
                channel: None,
            }],
        }
    }

    /// An empty context, used as the replay fallback when no message has
    /// arrived for a session yet.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn append(&mut self, payload: String, channel: Option<String>) {
        self.entries.push(ContextEntry { payload, channel });
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }
}

/// Holds, per session, the ordered context log. Created lazily on the first
/// delivered message and destroyed when the session's relay group empties.
pub struct ContextStore {
    sessions: DashMap<Id, SessionContext>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create the context if absent. Returns `false` (leaving the existing
    /// content untouched) when one already exists — an idempotent guard,
    /// not an overwrite.
    pub fn create_context(&self, session_id: Id, first_payload: String) -> bool {
        match self.sessions.entry(session_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(SessionContext::new(first_payload));
                true
            }
        }
    }

    /// Pure lookup; never creates. Returns a snapshot of the current log.
    pub fn get_context(&self, session_id: Id) -> Option<SessionContext> {
        self.sessions.get(&session_id).map(|c| c.clone())
    }

    /// Delete the context if present; returns whether removal occurred.
    pub fn remove_context(&self, session_id: Id) -> bool {
        self.sessions.remove(&session_id).is_some()
    }

    /// Append to an existing context's log. Returns `false` when no context
    /// exists for the session.
    pub fn append_to_context(&self, session_id: Id, payload: String, channel: Option<String>) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(mut context) => {
                context.append(payload, channel);
                true
            }
            None => false,
        }
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn create_context_when_session_does_not_exist_returns_true() {
        let store = ContextStore::new();
        assert!(store.create_context(Uuid::new_v4(), "Initial message".to_string()));
    }

    #[test]
    fn create_context_when_session_already_exists_returns_false() {
        let store = ContextStore::new();
        let session_id = Uuid::new_v4();
        store.create_context(session_id, "Initial message".to_string());

        assert!(!store.create_context(session_id, "Another message".to_string()));

        // First entry is untouched by the rejected second create.
        let context = store.get_context(session_id).unwrap();
        assert_eq!(context.entries()[0].payload, "Initial message");
    }

    #[test]
    fn get_context_when_session_does_not_exist_returns_none() {
        let store = ContextStore::new();
        assert!(store.get_context(Uuid::new_v4()).is_none());
    }

    #[test]
    fn remove_context_when_session_exists_returns_true() {
        let store = ContextStore::new();
        let session_id = Uuid::new_v4();
        store.create_context(session_id, "Initial message".to_string());

        assert!(store.remove_context(session_id));
        assert!(store.get_context(session_id).is_none());
    }

    #[test]
    fn remove_context_when_session_does_not_exist_returns_false() {
        let store = ContextStore::new();
        assert!(!store.remove_context(Uuid::new_v4()));
    }

    #[test]
    fn append_preserves_order_and_channels() {
        let store = ContextStore::new();
        let session_id = Uuid::new_v4();
        store.create_context(session_id, "first".to_string());
        store.append_to_context(session_id, "second".to_string(), Some("alerts".to_string()));
        store.append_to_context(session_id, "third".to_string(), None);

        let context = store.get_context(session_id).unwrap();
        let payloads: Vec<&str> = context
            .entries()
            .iter()
            .map(|e| e.payload.as_str())
            .collect();
        assert_eq!(payloads, vec!["first", "second", "third"]);
        assert_eq!(context.entries()[1].channel.as_deref(), Some("alerts"));
        assert_eq!(context.entries()[2].channel, None);
    }

    #[test]
    fn append_without_context_is_a_no_op() {
        let store = ContextStore::new();
        assert!(!store.append_to_context(Uuid::new_v4(), "x".to_string(), None));
    }

    #[test]
    fn context_serializes_as_the_bare_log() {
        let store = ContextStore::new();
        let session_id = Uuid::new_v4();
        store.create_context(session_id, "hello".to_string());

        let json = serde_json::to_value(store.get_context(session_id).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!([{"payload": "hello"}]));
    }

    #[test]
    fn contexts_are_isolated_per_session() {
        let store = ContextStore::new();
        let sessions: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for session_id in &sessions {
            assert!(store.create_context(*session_id, format!("Message for {session_id}")));
        }

        for session_id in sessions.iter().take(3) {
            assert!(store.remove_context(*session_id));
        }

        for session_id in sessions.iter().take(3) {
            assert!(store.get_context(*session_id).is_none());
        }
        for session_id in sessions.iter().skip(3) {
            assert!(store.get_context(*session_id).is_some());
        }
    }
}

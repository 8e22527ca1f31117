use crate::context_store::ContextStore;
use crate::error::Error;
use broker::MqttConnectionHandler;
use dashmap::DashMap;
use events::Id;
use log::*;
use sse::connection::ConnectionId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

type RelayGroup = Arc<StdMutex<HashSet<ConnectionId>>>;

/// Owns the mapping from session ID to its relay group (the set of live
/// push connections joined to the session), reference-counting joins and
/// leaves against the broker subscription.
///
/// A session is Active exactly while its relay group is non-empty; the 0→1
/// transition subscribes the broker topic first and the 1→0 transition
/// unsubscribes it, removes the session context and deletes the group. Both
/// transitions run under a single coarse lock so concurrent joins and
/// leaves serialize, and at most one subscribe is ever issued per
/// activation. Per-group membership changes take only that group's lock.
pub struct SessionManager {
    relays: DashMap<Id, RelayGroup>,
    connection_handler: Arc<MqttConnectionHandler>,
    context_store: Arc<ContextStore>,
    // The originating gateway identifier embedded in subscribed topic paths
    gateway_client_id: Id,
    session_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        gateway_client_id: Id,
        connection_handler: Arc<MqttConnectionHandler>,
        context_store: Arc<ContextStore>,
    ) -> Self {
        Self {
            relays: DashMap::new(),
            connection_handler,
            context_store,
            gateway_client_id,
            session_lock: Mutex::new(()),
        }
    }

    /// Join a connection to a session. On the first join the broker
    /// subscribe runs first; if it fails, the join fails and no group is
    /// created. Returns `true` when the connection was newly added,
    /// `false` when it was already a member.
    pub async fn join(
        &self,
        session_id: Id,
        connection_id: ConnectionId,
        cancel: &CancellationToken,
    ) -> Result<bool, Error> {
        let _guard = self.session_lock.lock().await;

        let group = match self.relays.get(&session_id) {
            Some(group) => group.clone(),
            None => {
                self.connection_handler
                    .subscribe_session(self.gateway_client_id, session_id, cancel)
                    .await?;

                debug!("Activated relay group for session {session_id}");
                let group: RelayGroup = Arc::new(StdMutex::new(HashSet::new()));
                self.relays.insert(session_id, group.clone());
                group
            }
        };

        let added = group
            .lock()
            .expect("relay group lock poisoned")
            .insert(connection_id);
        Ok(added)
    }

    /// Remove a connection from a session. When the group empties, the
    /// broker unsubscribe, the session-context removal and the group
    /// deletion all happen inside the same locked transition, so no message
    /// can be delivered to a just-destroyed group. Returns whether the
    /// removal occurred; `false` when the session has no group.
    pub async fn leave(
        &self,
        session_id: Id,
        connection_id: &ConnectionId,
        cancel: &CancellationToken,
    ) -> Result<bool, Error> {
        let _guard = self.session_lock.lock().await;

        let group = match self.relays.get(&session_id) {
            Some(group) => group.clone(),
            None => return Ok(false),
        };

        let (removed, now_empty) = {
            let mut members = group.lock().expect("relay group lock poisoned");
            let removed = members.remove(connection_id);
            (removed, members.is_empty())
        };

        if now_empty {
            self.connection_handler
                .unsubscribe_session(session_id, cancel)
                .await?;
            self.context_store.remove_context(session_id);
            self.relays.remove(&session_id);
            debug!("Deactivated relay group for session {session_id}");
        }

        Ok(removed)
    }

    /// Snapshot of the session's current relay group, safe to iterate
    /// without holding any lock. Empty when the session is not Active.
    pub fn relay_group(&self, session_id: Id) -> HashSet<ConnectionId> {
        match self.relays.get(&session_id) {
            Some(group) => group.lock().expect("relay group lock poisoned").clone(),
            None => HashSet::new(),
        }
    }
}

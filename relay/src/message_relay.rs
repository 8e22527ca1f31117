use crate::context_store::ContextStore;
use crate::session_manager::SessionManager;
use async_trait::async_trait;
use events::{Id, MessageDispatcher};
use log::*;
use sse::message::Event as SseEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handles broker-delivered messages by appending them to the session
/// context and fanning them out to every connection in the session's relay
/// group over the SSE transport.
///
/// A failed send to one connection never prevents delivery to the remaining
/// members: it is logged, counted, and not retried inline.
pub struct SseMessageRelay {
    session_manager: Arc<SessionManager>,
    context_store: Arc<ContextStore>,
    sse_manager: Arc<sse::Manager>,
    failed_sends: AtomicU64,
}

impl SseMessageRelay {
    pub fn new(
        session_manager: Arc<SessionManager>,
        context_store: Arc<ContextStore>,
        sse_manager: Arc<sse::Manager>,
    ) -> Self {
        Self {
            session_manager,
            context_store,
            sse_manager,
            failed_sends: AtomicU64::new(0),
        }
    }

    /// Total sends that failed during fan-out since startup.
    pub fn failed_sends(&self) -> u64 {
        self.failed_sends.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageDispatcher for SseMessageRelay {
    async fn dispatch(&self, session_id: Id, payload: String, channel: Option<String>) {
        // First message for a session seeds its context; later ones append.
        if !self
            .context_store
            .create_context(session_id, payload.clone())
        {
            self.context_store
                .append_to_context(session_id, payload.clone(), channel);
        }

        let clients = self.session_manager.relay_group(session_id);
        debug!(
            "Relaying message for session {session_id} to {} connection(s)",
            clients.len()
        );

        for connection_id in &clients {
            let sent = self.sse_manager.send_to_connection(
                connection_id,
                SseEvent::MessageReceived {
                    payload: payload.clone(),
                },
            );
            if !sent {
                warn!(
                    "Relay send failed for session {session_id}, connection {}",
                    connection_id.as_str()
                );
                self.failed_sends.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker::error::Error as BrokerError;
    use broker::{BrokerClient, MqttConnectionHandler, OutgoingMessage};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct QuietClient;

    #[async_trait]
    impl BrokerClient for QuietClient {
        async fn subscribe(&self, _topic_filter: &str) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn unsubscribe(&self, _topic_filter: &str) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn publish(&self, _message: OutgoingMessage) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    struct Fixture {
        context_store: Arc<ContextStore>,
        session_manager: Arc<SessionManager>,
        sse_manager: Arc<sse::Manager>,
        relay: SseMessageRelay,
    }

    fn fixture() -> Fixture {
        let handler = Arc::new(MqttConnectionHandler::new(Arc::new(QuietClient)));
        let context_store = Arc::new(ContextStore::new());
        let session_manager = Arc::new(SessionManager::new(
            Uuid::new_v4(),
            handler,
            context_store.clone(),
        ));
        let sse_manager = Arc::new(sse::Manager::new());
        let relay = SseMessageRelay::new(
            session_manager.clone(),
            context_store.clone(),
            sse_manager.clone(),
        );
        Fixture {
            context_store,
            session_manager,
            sse_manager,
            relay,
        }
    }

    #[tokio::test]
    async fn first_dispatch_creates_the_context() {
        let f = fixture();
        let session_id = Uuid::new_v4();

        f.relay
            .dispatch(session_id, "hello".to_string(), Some("alerts".to_string()))
            .await;

        let context = f.context_store.get_context(session_id).unwrap();
        assert_eq!(context.entries().len(), 1);
        assert_eq!(context.entries()[0].payload, "hello");
        // The seed entry records only the payload.
        assert_eq!(context.entries()[0].channel, None);
    }

    #[tokio::test]
    async fn later_dispatches_append_in_order() {
        let f = fixture();
        let session_id = Uuid::new_v4();

        f.relay.dispatch(session_id, "one".to_string(), None).await;
        f.relay
            .dispatch(session_id, "two".to_string(), Some("alerts".to_string()))
            .await;
        f.relay.dispatch(session_id, "three".to_string(), None).await;

        let context = f.context_store.get_context(session_id).unwrap();
        let payloads: Vec<&str> = context
            .entries()
            .iter()
            .map(|e| e.payload.as_str())
            .collect();
        assert_eq!(payloads, vec!["one", "two", "three"]);
        assert_eq!(context.entries()[1].channel.as_deref(), Some("alerts"));
    }

    #[tokio::test]
    async fn dispatch_fans_out_to_every_joined_connection() {
        let f = fixture();
        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = f.sse_manager.register_connection(tx1);
        let c2 = f.sse_manager.register_connection(tx2);
        f.session_manager
            .join(session_id, c1, &cancel)
            .await
            .unwrap();
        f.session_manager
            .join(session_id, c2, &cancel)
            .await
            .unwrap();

        f.relay.dispatch(session_id, "hello".to_string(), None).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert_eq!(f.relay.failed_sends(), 0);
    }

    #[tokio::test]
    async fn dispatch_to_unjoined_session_only_records_context() {
        let f = fixture();
        let session_id = Uuid::new_v4();

        f.relay.dispatch(session_id, "hello".to_string(), None).await;

        assert!(f.context_store.get_context(session_id).is_some());
        assert_eq!(f.relay.failed_sends(), 0);
    }

    #[tokio::test]
    async fn one_failed_send_does_not_stop_the_fan_out() {
        let f = fixture();
        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        // A joined connection whose SSE registration is already gone.
        let (tx_dead, _) = mpsc::unbounded_channel();
        let dead = f.sse_manager.register_connection(tx_dead);
        f.sse_manager.unregister_connection(&dead);
        f.session_manager
            .join(session_id, dead, &cancel)
            .await
            .unwrap();

        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let live = f.sse_manager.register_connection(tx_live);
        f.session_manager
            .join(session_id, live, &cancel)
            .await
            .unwrap();

        f.relay.dispatch(session_id, "hello".to_string(), None).await;

        assert!(rx_live.try_recv().is_ok());
        assert_eq!(f.relay.failed_sends(), 1);
    }
}

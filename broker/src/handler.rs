use crate::error::Error;
use crate::topic;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use events::{Id, MessageDispatcher};
use log::*;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Metadata property naming the service that published a message.
const SOURCE_SERVICE_PROPERTY: (&str, &str) = ("source-service", "Gateway Service");
const TIMESTAMP_PROPERTY: &str = "timestamp-utc";
const TARGET_ID_PROPERTY: &str = "x-target-id";

/// A fully assembled message handed to the broker client for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: String,
    pub user_properties: Vec<(String, String)>,
}

/// The boundary with the off-the-shelf MQTT client library. Everything below
/// this trait (handshake, TLS, QoS delivery, reconnection) belongs to the
/// client implementation; the handler only assumes these three operations,
/// and assumes they are NOT safe to run concurrently.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn subscribe(&self, topic_filter: &str) -> Result<(), Error>;
    async fn unsubscribe(&self, topic_filter: &str) -> Result<(), Error>;
    async fn publish(&self, message: OutgoingMessage) -> Result<(), Error>;
}

/// Owns the single broker connection and translates session-level operations
/// into broker-level subscribe/publish/unsubscribe calls.
///
/// Holds the `session_id -> originating client id` mapping used to
/// reconstruct topic names, a single-slot downstream dispatcher, and the
/// mutual-exclusion gate that serializes all broker I/O.
pub struct MqttConnectionHandler {
    session_clients: DashMap<Id, Id>,
    client: Arc<dyn BrokerClient>,
    dispatcher: RwLock<Option<Arc<dyn MessageDispatcher>>>,
    // At most one in-flight broker operation at a time
    gate: Mutex<()>,
}

impl MqttConnectionHandler {
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        Self {
            session_clients: DashMap::new(),
            client,
            dispatcher: RwLock::new(None),
            gate: Mutex::new(()),
        }
    }

    /// Register the downstream dispatcher. Single slot: a later call
    /// replaces the prior dispatcher. The slot only ever holds a pointer,
    /// so a lock poisoned by a panicking holder still contains a usable
    /// value and is recovered rather than propagated.
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn MessageDispatcher>) {
        let mut slot = self
            .dispatcher
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(dispatcher);
    }

    /// Subscribe the broker to a session's topic filter. No-op when a
    /// subscription for `session_id` already exists. On failure the recorded
    /// mapping is rolled back so a retry is possible, and the error
    /// propagates to the caller.
    pub async fn subscribe_session(
        &self,
        client_id: Id,
        session_id: Id,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if self.session_clients.contains_key(&session_id) {
            return Ok(());
        }

        self.session_clients.insert(session_id, client_id);

        let filter = topic::subscription_filter(client_id, session_id);
        let result = self.gated(cancel, self.client.subscribe(&filter)).await;

        if result.is_err() {
            self.session_clients.remove(&session_id);
        }

        result
    }

    /// Unsubscribe the broker from a session's topic filter. No-op when no
    /// subscription exists; the mapping is removed only after the broker
    /// unsubscribe succeeds.
    pub async fn unsubscribe_session(
        &self,
        session_id: Id,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let client_id = match self.session_clients.get(&session_id) {
            Some(entry) => *entry.value(),
            None => return Ok(()),
        };

        let filter = topic::subscription_filter(client_id, session_id);
        self.gated(cancel, self.client.unsubscribe(&filter)).await?;

        self.session_clients.remove(&session_id);
        Ok(())
    }

    /// Publish a payload on a session's topic, optionally suffixed with a
    /// channel. Fails with `SessionNotFound` when no client mapping exists
    /// for topic construction.
    pub async fn publish_message(
        &self,
        session_id: Id,
        payload: String,
        channel: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let message = self.build_message(session_id, payload, channel, None)?;
        self.gated(cancel, self.client.publish(message)).await
    }

    /// Publish addressed to a single recipient: carries an `x-target-id`
    /// property so only the intended recipient path treats it as direct.
    pub async fn publish_direct_message(
        &self,
        session_id: Id,
        target_id: Id,
        payload: String,
        channel: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let message = self.build_message(session_id, payload, channel, Some(target_id))?;
        self.gated(cancel, self.client.publish(message)).await
    }

    /// Entry point for every broker-delivered message. Topics outside the
    /// gateway scheme are silently discarded.
    pub async fn handle_incoming(&self, topic: &str, payload: String) {
        let Some(parsed) = topic::parse(topic) else {
            debug!("Discarding broker message with unrecognized topic: {topic}");
            return;
        };

        let dispatcher = self
            .dispatcher
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match dispatcher {
            Some(dispatcher) => {
                dispatcher
                    .dispatch(parsed.session_id, payload, parsed.channel)
                    .await;
            }
            None => warn!(
                "Broker message for session {} arrived before a dispatcher was registered",
                parsed.session_id
            ),
        }
    }

    fn build_message(
        &self,
        session_id: Id,
        payload: String,
        channel: Option<&str>,
        target_id: Option<Id>,
    ) -> Result<OutgoingMessage, Error> {
        let client_id = match self.session_clients.get(&session_id) {
            Some(entry) => *entry.value(),
            None => return Err(Error::session_not_found(session_id)),
        };

        let mut user_properties = vec![
            (
                SOURCE_SERVICE_PROPERTY.0.to_string(),
                SOURCE_SERVICE_PROPERTY.1.to_string(),
            ),
            (TIMESTAMP_PROPERTY.to_string(), Utc::now().to_rfc3339()),
        ];
        if let Some(target_id) = target_id {
            user_properties.push((TARGET_ID_PROPERTY.to_string(), target_id.to_string()));
        }

        Ok(OutgoingMessage {
            topic: topic::session_topic(client_id, session_id, channel),
            payload,
            user_properties,
        })
    }

    /// Run one broker operation behind the mutual-exclusion gate. The
    /// cancellation signal aborts both the wait for the gate and the
    /// in-flight call; the gate is released unconditionally afterward.
    async fn gated<F>(&self, cancel: &CancellationToken, op: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), Error>>,
    {
        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::cancelled()),
            guard = self.gate.lock() => guard,
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::cancelled()),
            result = op => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerErrorKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    /// Records every call made against it; optionally fails everything.
    #[derive(Default)]
    struct RecordingClient {
        calls: StdMutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl RecordingClient {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn record(&self, call: String) -> Result<(), Error> {
            self.calls.lock().unwrap().push(call);
            if self.fail.load(Ordering::SeqCst) {
                Err(Error {
                    source: Some("broker unavailable".into()),
                    error_kind: BrokerErrorKind::Io,
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl BrokerClient for RecordingClient {
        async fn subscribe(&self, topic_filter: &str) -> Result<(), Error> {
            self.record(format!("subscribe {topic_filter}"))
        }

        async fn unsubscribe(&self, topic_filter: &str) -> Result<(), Error> {
            self.record(format!("unsubscribe {topic_filter}"))
        }

        async fn publish(&self, message: OutgoingMessage) -> Result<(), Error> {
            self.record(format!("publish {}", message.topic))
        }
    }

    /// Captures dispatched messages for assertions.
    #[derive(Default)]
    struct RecordingDispatcher {
        dispatched: StdMutex<Vec<(Id, String, Option<String>)>>,
    }

    #[async_trait]
    impl MessageDispatcher for RecordingDispatcher {
        async fn dispatch(&self, session_id: Id, payload: String, channel: Option<String>) {
            self.dispatched
                .lock()
                .unwrap()
                .push((session_id, payload, channel));
        }
    }

    fn handler_with_client() -> (Arc<RecordingClient>, MqttConnectionHandler) {
        let client = Arc::new(RecordingClient::default());
        let handler = MqttConnectionHandler::new(client.clone());
        (client, handler)
    }

    #[tokio::test]
    async fn subscribe_session_issues_wildcard_subscribe() {
        let (client, handler) = handler_with_client();
        let (client_id, session_id) = (Uuid::new_v4(), Uuid::new_v4());
        let cancel = CancellationToken::new();

        handler
            .subscribe_session(client_id, session_id, &cancel)
            .await
            .unwrap();

        assert_eq!(
            client.calls(),
            vec![format!("subscribe gateway/{client_id}/{session_id}/#")]
        );
    }

    #[tokio::test]
    async fn subscribe_session_is_idempotent() {
        let (client, handler) = handler_with_client();
        let (client_id, session_id) = (Uuid::new_v4(), Uuid::new_v4());
        let cancel = CancellationToken::new();

        handler
            .subscribe_session(client_id, session_id, &cancel)
            .await
            .unwrap();
        handler
            .subscribe_session(client_id, session_id, &cancel)
            .await
            .unwrap();

        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn subscribe_failure_rolls_back_mapping() {
        let (client, handler) = handler_with_client();
        let (client_id, session_id) = (Uuid::new_v4(), Uuid::new_v4());
        let cancel = CancellationToken::new();

        client.set_fail(true);
        let result = handler
            .subscribe_session(client_id, session_id, &cancel)
            .await;
        assert_eq!(result.unwrap_err().error_kind, BrokerErrorKind::Io);

        // Mapping was rolled back, so a retry issues a second subscribe.
        client.set_fail(false);
        handler
            .subscribe_session(client_id, session_id, &cancel)
            .await
            .unwrap();
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_without_subscription_is_a_no_op() {
        let (client, handler) = handler_with_client();
        let cancel = CancellationToken::new();

        handler
            .unsubscribe_session(Uuid::new_v4(), &cancel)
            .await
            .unwrap();

        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_mapping_after_success() {
        let (client, handler) = handler_with_client();
        let (client_id, session_id) = (Uuid::new_v4(), Uuid::new_v4());
        let cancel = CancellationToken::new();

        handler
            .subscribe_session(client_id, session_id, &cancel)
            .await
            .unwrap();
        handler
            .unsubscribe_session(session_id, &cancel)
            .await
            .unwrap();

        // The mapping is gone: publishing now fails with SessionNotFound.
        let result = handler
            .publish_message(session_id, "p".to_string(), None, &cancel)
            .await;
        assert_eq!(
            result.unwrap_err().error_kind,
            BrokerErrorKind::SessionNotFound
        );
    }

    #[tokio::test]
    async fn unsubscribe_failure_keeps_mapping() {
        let (client, handler) = handler_with_client();
        let (client_id, session_id) = (Uuid::new_v4(), Uuid::new_v4());
        let cancel = CancellationToken::new();

        handler
            .subscribe_session(client_id, session_id, &cancel)
            .await
            .unwrap();

        client.set_fail(true);
        assert!(handler
            .unsubscribe_session(session_id, &cancel)
            .await
            .is_err());

        // Mapping survived the failed unsubscribe; publish still resolves a topic.
        client.set_fail(false);
        handler
            .publish_message(session_id, "p".to_string(), None, &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publish_builds_channel_suffixed_topic() {
        let (client, handler) = handler_with_client();
        let (client_id, session_id) = (Uuid::new_v4(), Uuid::new_v4());
        let cancel = CancellationToken::new();

        handler
            .subscribe_session(client_id, session_id, &cancel)
            .await
            .unwrap();
        handler
            .publish_message(session_id, "p".to_string(), Some("alerts"), &cancel)
            .await
            .unwrap();

        assert_eq!(
            client.calls().last().unwrap(),
            &format!("publish gateway/{client_id}/{session_id}/alerts")
        );
    }

    #[tokio::test]
    async fn publish_without_mapping_is_not_found() {
        let (client, handler) = handler_with_client();
        let cancel = CancellationToken::new();

        let result = handler
            .publish_message(Uuid::new_v4(), "p".to_string(), None, &cancel)
            .await;

        assert_eq!(
            result.unwrap_err().error_kind,
            BrokerErrorKind::SessionNotFound
        );
        // No broker interaction was attempted.
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn build_message_attaches_metadata_properties() {
        let (_client, handler) = handler_with_client();
        let (client_id, session_id) = (Uuid::new_v4(), Uuid::new_v4());
        let cancel = CancellationToken::new();

        handler
            .subscribe_session(client_id, session_id, &cancel)
            .await
            .unwrap();

        let message = handler
            .build_message(session_id, "p".to_string(), None, None)
            .unwrap();
        let keys: Vec<&str> = message
            .user_properties
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, vec!["source-service", "timestamp-utc"]);

        let timestamp = &message.user_properties[1].1;
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn direct_message_carries_target_id_property() {
        let (_client, handler) = handler_with_client();
        let (client_id, session_id, target_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let cancel = CancellationToken::new();

        handler
            .subscribe_session(client_id, session_id, &cancel)
            .await
            .unwrap();

        let message = handler
            .build_message(session_id, "p".to_string(), None, Some(target_id))
            .unwrap();
        assert!(message
            .user_properties
            .contains(&("x-target-id".to_string(), target_id.to_string())));
    }

    #[tokio::test]
    async fn incoming_message_reaches_dispatcher() {
        let (_client, handler) = handler_with_client();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        handler.set_dispatcher(dispatcher.clone());

        let session_id = Uuid::new_v4();
        handler
            .handle_incoming(
                &format!("gateway/{}/{session_id}/alerts", Uuid::new_v4()),
                "hello".to_string(),
            )
            .await;

        let dispatched = dispatcher.dispatched.lock().unwrap().clone();
        assert_eq!(
            dispatched,
            vec![(
                session_id,
                "hello".to_string(),
                Some("alerts".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn incoming_message_without_channel_segment() {
        let (_client, handler) = handler_with_client();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        handler.set_dispatcher(dispatcher.clone());

        let session_id = Uuid::new_v4();
        handler
            .handle_incoming(
                &format!("gateway/{}/{session_id}", Uuid::new_v4()),
                "hello".to_string(),
            )
            .await;

        let dispatched = dispatcher.dispatched.lock().unwrap().clone();
        assert_eq!(dispatched[0].2, None);
    }

    #[tokio::test]
    async fn malformed_topics_never_reach_dispatcher() {
        let (_client, handler) = handler_with_client();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        handler.set_dispatcher(dispatcher.clone());

        handler
            .handle_incoming(&format!("gateway/{}", Uuid::new_v4()), "x".to_string())
            .await;
        handler
            .handle_incoming(
                &format!("gateway/{}/not-a-uuid", Uuid::new_v4()),
                "x".to_string(),
            )
            .await;
        handler
            .handle_incoming("other/scheme/entirely", "x".to_string())
            .await;

        assert!(dispatcher.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_dispatcher_replaces_prior_slot() {
        let (_client, handler) = handler_with_client();
        let first = Arc::new(RecordingDispatcher::default());
        let second = Arc::new(RecordingDispatcher::default());
        handler.set_dispatcher(first.clone());
        handler.set_dispatcher(second.clone());

        handler
            .handle_incoming(
                &format!("gateway/{}/{}", Uuid::new_v4(), Uuid::new_v4()),
                "x".to_string(),
            )
            .await;

        assert!(first.dispatched.lock().unwrap().is_empty());
        assert_eq!(second.dispatched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dispatcher_slot_survives_a_poisoned_lock() {
        let (_client, handler) = handler_with_client();
        let handler = Arc::new(handler);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        handler.set_dispatcher(dispatcher.clone());

        // Poison the slot's lock by panicking while holding the write guard.
        let poisoner = handler.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.dispatcher.write();
            panic!("poisoning the dispatcher lock");
        })
        .join();

        let session_id = Uuid::new_v4();
        handler
            .handle_incoming(
                &format!("gateway/{}/{session_id}", Uuid::new_v4()),
                "hello".to_string(),
            )
            .await;
        assert_eq!(dispatcher.dispatched.lock().unwrap().len(), 1);

        // Replacing the dispatcher still works too.
        let replacement = Arc::new(RecordingDispatcher::default());
        handler.set_dispatcher(replacement.clone());
        handler
            .handle_incoming(
                &format!("gateway/{}/{session_id}", Uuid::new_v4()),
                "again".to_string(),
            )
            .await;
        assert_eq!(replacement.dispatched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_the_operation() {
        let (client, handler) = handler_with_client();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = handler
            .subscribe_session(Uuid::new_v4(), Uuid::new_v4(), &cancel)
            .await;

        assert_eq!(result.unwrap_err().error_kind, BrokerErrorKind::Cancelled);
        assert!(client.calls().is_empty());
    }
}

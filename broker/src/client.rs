//! `rumqttc`-backed implementation of the [`BrokerClient`] boundary.
//!
//! Uses the MQTT v5 client so publish metadata can ride in user properties.
//! All deliveries use QoS ExactlyOnce, matching the gateway's
//! delivery-confirmed contract.

use crate::error::Error;
use crate::handler::{BrokerClient, MqttConnectionHandler, OutgoingMessage};
use async_trait::async_trait;
use events::Id;
use log::*;
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::{TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Broker connection settings, resolved once at startup from the config
/// layer. `trusted_connection` mirrors the original connection-string flag:
/// `Some(true)` means TLS with no credentials, `Some(false)` means
/// credentials over plain TCP, `None` falls back to credentials only when a
/// username is present.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: Id,
    pub username: Option<String>,
    pub password: Option<String>,
    pub trusted_connection: Option<bool>,
    pub clean_session: bool,
}

pub struct RumqttcBrokerClient {
    client: AsyncClient,
}

/// Build the MQTT client and its event loop from resolved settings. The
/// connection itself is established lazily by the event loop's first poll.
pub fn connect(settings: &BrokerSettings) -> (RumqttcBrokerClient, EventLoop) {
    let mut options = MqttOptions::new(
        settings.client_id.to_string(),
        &settings.host,
        settings.port,
    );
    options.set_clean_start(settings.clean_session);
    options.set_keep_alive(Duration::from_secs(30));

    match settings.trusted_connection {
        Some(true) => {
            options.set_transport(Transport::Tls(TlsConfiguration::Native));
        }
        Some(false) => {
            set_credentials(&mut options, settings);
        }
        None => {
            if settings
                .username
                .as_deref()
                .is_some_and(|u| !u.trim().is_empty())
            {
                set_credentials(&mut options, settings);
            }
        }
    }

    let (client, event_loop) = AsyncClient::new(options, 32);
    (RumqttcBrokerClient { client }, event_loop)
}

fn set_credentials(options: &mut MqttOptions, settings: &BrokerSettings) {
    options.set_credentials(
        settings.username.clone().unwrap_or_default(),
        settings.password.clone().unwrap_or_default(),
    );
}

/// Drive the MQTT event loop, forwarding every inbound publish to the
/// connection handler. Poll errors (including disconnects) are logged and
/// retried after a short pause; rumqttc reconnects on the next poll.
pub fn spawn_event_loop(
    mut event_loop: EventLoop,
    handler: Arc<MqttConnectionHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let topic = String::from_utf8_lossy(&publish.topic).to_string();
                    let payload = String::from_utf8_lossy(&publish.payload).to_string();
                    handler.handle_incoming(&topic, payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT event loop error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

#[async_trait]
impl BrokerClient for RumqttcBrokerClient {
    async fn subscribe(&self, topic_filter: &str) -> Result<(), Error> {
        self.client
            .subscribe(topic_filter, QoS::ExactlyOnce)
            .await
            .map_err(Error::from)
    }

    async fn unsubscribe(&self, topic_filter: &str) -> Result<(), Error> {
        self.client
            .unsubscribe(topic_filter)
            .await
            .map_err(Error::from)
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<(), Error> {
        let properties = PublishProperties {
            user_properties: message.user_properties,
            ..Default::default()
        };

        self.client
            .publish_with_properties(
                message.topic,
                QoS::ExactlyOnce,
                false,
                message.payload,
                properties,
            )
            .await
            .map_err(Error::from)
    }
}

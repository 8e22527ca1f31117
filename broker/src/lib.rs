//! Broker connection layer: owns the single MQTT connection and translates
//! session-level operations into broker subscribe/publish/unsubscribe calls.
//!
//! The handler serializes all broker I/O through one mutual-exclusion gate
//! because the underlying client connection is not assumed to be safe for
//! concurrent multiplexed operations. The off-the-shelf client library sits
//! behind the [`handler::BrokerClient`] trait; `client` holds the `rumqttc`
//! implementation and the event-loop pump.

pub mod client;
pub mod error;
pub mod handler;
pub mod topic;

pub use client::{connect, spawn_event_loop, BrokerSettings, RumqttcBrokerClient};
pub use handler::{BrokerClient, MqttConnectionHandler, OutgoingMessage};
